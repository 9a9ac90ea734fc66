//! 协议层
//! 处理身份登记与消息路由，依赖于底层的网络层进行网络读写

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc::Sender;

use crate::network::envelope::Envelope;

pub(crate) use router::Router;

pub use registry::{Registry, SlotRef};

pub mod registry;
mod router;

/// 身份不在目录中时，拒绝通知的结尾
pub const NOT_REGISTERED: &str = "is not a registered ID!";
/// 身份已在线时，拒绝通知的结尾
pub const ALREADY_CONNECTED: &str = "already connected!";
/// 在线列表查询内容为空时使用的开头
pub const DIRECTORY_MARKER: &str = "[시스템]";

/// 发送给 router 的消息
#[derive(Debug)]
pub enum Incoming {
    Connect {
        identity: String,
        peer_addr: SocketAddr,
        conn_tx: Sender<Outgoing>,
    },
    Data {
        slot: SlotRef,
        envelope: Envelope,
    },
    Disconnect {
        slot: SlotRef,
    },
}

/// router 发送给客户端连接的消息
#[derive(Debug)]
pub enum Outgoing {
    ConnAck(ConnAck),
    Data(Bytes),
    /// 同一身份重复登录，旧连接被挤掉
    Disconnect,
}

/// 握手结果，notice 会原样写给客户端
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnAck {
    Accepted { slot: SlotRef, notice: String },
    Rejected { notice: String },
}

impl ConnAck {
    pub fn notice(&self) -> &str {
        match self {
            ConnAck::Accepted { notice, .. } | ConnAck::Rejected { notice } => notice,
        }
    }
}
