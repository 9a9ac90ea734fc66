//! 消息信封的编解码
//!
//! 上行格式：`[recipient]:payload`，不符合格式的内容一律视为 `ALLMSG` 广播
//! 下行格式：`[sender] payload`
//!
//! 消息内容始终按原始字节处理，不做任何字符集转换

use std::{borrow::Cow, fmt};

use bytes::Bytes;

/// 广播地址
pub const BROADCAST: &str = "ALLMSG";
/// 在线列表查询地址
pub const DIRECTORY: &str = "IDLIST";
/// 存储端身份
pub const STORAGE: &str = "SERVER_SQL";
/// 存储端需要保留完整路由信息的消息标记
pub const STORAGE_MARKER: &str = "image_path:";
/// 有方括号但缺少冒号时的替代内容
pub const MALFORMED_PAYLOAD: &str = "malformed message format";

/// 消息的目的地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// 发给某个具体身份
    Directed(String),
    /// `ALLMSG`
    Broadcast,
    /// `IDLIST`
    Directory,
}

impl Address {
    pub fn as_str(&self) -> &str {
        match self {
            Address::Directed(identity) => identity,
            Address::Broadcast => BROADCAST,
            Address::Directory => DIRECTORY,
        }
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        match s {
            BROADCAST => Address::Broadcast,
            DIRECTORY => Address::Directory,
            identity => Address::Directed(identity.into()),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条上行消息解析后的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// 发送者，永远取自连接绑定的身份
    pub sender: String,
    pub recipient: Address,
    pub payload: Bytes,
}

impl Envelope {
    /// 解析一条上行消息
    ///
    /// 解析永远不会失败：
    /// * `[to]:payload` => 定向/广播/查询
    /// * `[to]payload` => 目的地址照常解析，内容替换为 [`MALFORMED_PAYLOAD`]
    /// * 其他 => 整条内容广播
    pub fn decode(raw: &[u8], sender: &str) -> Self {
        let (recipient, payload) = match split_bracket(raw) {
            Some((recipient, rest)) => {
                let recipient = Address::from(&*String::from_utf8_lossy(recipient));
                match rest.strip_prefix(b":") {
                    Some(payload) => (recipient, Bytes::copy_from_slice(payload)),
                    None => (recipient, Bytes::from_static(MALFORMED_PAYLOAD.as_bytes())),
                }
            }
            None => (Address::Broadcast, Bytes::copy_from_slice(raw)),
        };

        Self {
            sender: sender.into(),
            recipient,
            payload,
        }
    }

    /// 转发给接收端的字节
    pub fn encode(&self) -> Vec<u8> {
        encode(&self.sender, &self.recipient, &self.payload)
    }

    /// 仅用于日志输出
    pub fn payload_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// 是否需要保留 `[sender -> recipient]` 形式
    fn keeps_route(recipient: &Address, payload: &[u8]) -> bool {
        let marker = STORAGE_MARKER.as_bytes();
        matches!(recipient, Address::Directed(to) if to == STORAGE)
            && payload.windows(marker.len()).any(|window| window == marker)
    }
}

/// 下行消息编码，内容原样拼接在前缀之后
pub fn encode(sender: &str, recipient: &Address, payload: &[u8]) -> Vec<u8> {
    let prefix = if Envelope::keeps_route(recipient, payload) {
        format!("[{} -> {}] ", sender, recipient)
    } else {
        format!("[{}] ", sender)
    };

    let mut frame = Vec::with_capacity(prefix.len() + payload.len());
    frame.extend_from_slice(prefix.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// 接收端收到的一条转发消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub sender: String,
    /// 只有保留路由信息的消息才带有
    pub recipient: Option<String>,
    pub payload: String,
}

impl Delivery {
    /// [`encode`] 的逆过程，格式不对返回 `None`
    pub fn parse(frame: &str) -> Option<Self> {
        let (route, rest) = frame.strip_prefix('[')?.split_once(']')?;
        let payload = rest.strip_prefix(' ').unwrap_or(rest);
        let (sender, recipient) = match route.split_once(" -> ") {
            Some((sender, recipient)) => (sender, Some(recipient.to_owned())),
            None => (route, None),
        };

        Some(Self {
            sender: sender.into(),
            recipient,
            payload: payload.into(),
        })
    }
}

/// 解析握手报文 `[identity]`
///
/// 去掉行尾换行和方括号，空身份返回 `None`
pub fn parse_identity(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_end_matches(&['\r', '\n'][..]);
    let text = text.strip_prefix('[').unwrap_or(text);
    let text = text.strip_suffix(']').unwrap_or(text);

    if text.is_empty() {
        None
    } else {
        Some(text.to_owned())
    }
}

/// 以 `[` 开头并且存在 `]` 时，返回括号内的内容和剩余部分
fn split_bracket(raw: &[u8]) -> Option<(&[u8], &[u8])> {
    let inner = raw.strip_prefix(b"[")?;
    let close = inner.iter().position(|&b| b == b']')?;
    Some((&inner[..close], &inner[close + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_directed() {
        let envelope = Envelope::decode(b"[B]:hello", "A");
        assert_eq!(
            envelope,
            Envelope {
                sender: "A".into(),
                recipient: Address::Directed("B".into()),
                payload: "hello".into(),
            }
        );
    }

    #[test]
    fn decode_reserved_addresses() {
        assert_eq!(
            Envelope::decode(b"[ALLMSG]:hi all", "A").recipient,
            Address::Broadcast
        );
        let query = Envelope::decode(b"[IDLIST]:", "A");
        assert_eq!(query.recipient, Address::Directory);
        assert!(query.payload.is_empty());
    }

    #[test]
    fn decode_missing_colon_is_malformed() {
        let envelope = Envelope::decode(b"[B]hello", "A");
        assert_eq!(envelope.recipient, Address::Directed("B".into()));
        assert_eq!(envelope.payload, MALFORMED_PAYLOAD);
    }

    #[test]
    fn decode_without_bracket_falls_back_to_broadcast() {
        let envelope = Envelope::decode(b"just text", "A");
        assert_eq!(envelope.recipient, Address::Broadcast);
        assert_eq!(envelope.payload, "just text");

        // 只有左括号
        let envelope = Envelope::decode(b"[B:hello", "A");
        assert_eq!(envelope.recipient, Address::Broadcast);
        assert_eq!(envelope.payload, "[B:hello");
    }

    #[test]
    fn sender_never_comes_from_payload() {
        let envelope = Envelope::decode(b"[B]:[C] spoofed", "A");
        assert_eq!(envelope.sender, "A");
        assert_eq!(envelope.payload, "[C] spoofed");
    }

    #[test]
    fn encode_prefixes_sender() {
        let envelope = Envelope::decode(b"[B]:hello", "A");
        assert_eq!(envelope.encode(), b"[A] hello".to_vec());
    }

    #[test]
    fn encode_keeps_route_for_storage_measurements() {
        let payload = "image_path:shoe_1.jpg wear_percentage:55.20 timestamp:1700000000";
        let raw = format!("[SERVER_SQL]:{}", payload);
        let envelope = Envelope::decode(raw.as_bytes(), "JETSON");
        assert_eq!(
            String::from_utf8(envelope.encode()).unwrap(),
            format!("[JETSON -> SERVER_SQL] {}", payload)
        );

        // 没有 image_path 的消息照常编码
        let envelope = Envelope::decode(b"[SERVER_SQL]:ping", "JETSON");
        assert_eq!(envelope.encode(), b"[JETSON] ping".to_vec());
    }

    #[test]
    fn payload_bytes_pass_through_unchanged() {
        // "가" 在读取边界处被截成两半，后面再跟一个非法字节
        let syllable = "가".as_bytes();
        let mut raw = b"[B]:x".to_vec();
        raw.extend_from_slice(&syllable[..2]);
        raw.push(0xff);

        let envelope = Envelope::decode(&raw, "A");
        assert_eq!(envelope.recipient, Address::Directed("B".into()));
        assert_eq!(&envelope.payload[..], &raw[4..]);

        let mut expected = b"[A] ".to_vec();
        expected.extend_from_slice(&raw[4..]);
        assert_eq!(envelope.encode(), expected);

        // 剩下的半个字符没有方括号，整段原样广播
        let tail = Envelope::decode(&syllable[2..], "A");
        assert_eq!(tail.recipient, Address::Broadcast);
        assert_eq!(&tail.payload[..], &syllable[2..]);
        assert_eq!(tail.encode(), [&b"[A] "[..], &syllable[2..]].concat());
    }

    #[test]
    fn delivery_recovers_sender_and_payload() {
        let frame = encode("A", &Address::Directed("B".into()), b"hello world");
        let delivery = Delivery::parse(std::str::from_utf8(&frame).unwrap()).unwrap();
        assert_eq!(delivery.sender, "A");
        assert_eq!(delivery.recipient, None);
        assert_eq!(delivery.payload, "hello world");

        let delivery =
            Delivery::parse("[JETSON -> SERVER_SQL] image_path:a.jpg").unwrap();
        assert_eq!(delivery.sender, "JETSON");
        assert_eq!(delivery.recipient.as_deref(), Some("SERVER_SQL"));

        assert!(Delivery::parse("no brackets").is_none());
    }

    #[test]
    fn identity_frame_parsing() {
        assert_eq!(parse_identity(b"[JETSON]"), Some("JETSON".into()));
        assert_eq!(parse_identity(b"[JETSON]\n"), Some("JETSON".into()));
        assert_eq!(parse_identity(b"BOX_ARD"), Some("BOX_ARD".into()));
        assert_eq!(parse_identity(b"[]"), None);
        assert_eq!(parse_identity(b""), None);
    }
}
