use std::{collections::HashMap, net::SocketAddr};

use tokio::sync::mpsc::Sender;

use super::Outgoing;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),
    #[error("Identity already connected: {0}")]
    AlreadyConnected(String),
}

/// 同一个身份的不同连接，用于区分被挤掉的旧连接
pub type SessionId = u64;

/// 一次连接在注册表中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    pub index: usize,
    pub session: SessionId,
}

/// 已连接槽位的状态
#[derive(Debug)]
struct Live {
    session: SessionId,
    conn_tx: Sender<Outgoing>,
    peer_addr: SocketAddr,
}

/// 注册表中的一个槽位，对应目录中的一个身份
#[derive(Debug)]
pub struct Slot {
    identity: String,
    index: usize,
    live: Option<Live>,
}

impl Slot {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_connected(&self) -> bool {
        self.live.is_some()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.live.as_ref().map(|live| live.peer_addr)
    }
}

/// 身份注册表
/// 目录在启动时确定，运行期间不增不减，槽位只会在连接/断开之间切换
/// 由 router 独占，所有读写都在 router 的事件循环中串行执行
#[derive(Debug)]
pub struct Registry {
    /// 按目录顺序排列
    slots: Vec<Slot>,
    /// key = identity, value = 槽位下标
    index: HashMap<String, usize>,
    /// 当前在线数
    connected: usize,
    next_session: SessionId,
}

impl Registry {
    /// 目录中重复的身份只保留第一个
    pub fn new<I, S>(catalogue: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut slots = Vec::new();
        let mut index = HashMap::new();
        for identity in catalogue {
            let identity = identity.into();
            if index.contains_key(&identity) {
                continue;
            }
            index.insert(identity.clone(), slots.len());
            slots.push(Slot {
                identity,
                index: slots.len(),
                live: None,
            });
        }

        Self {
            slots,
            index,
            connected: 0,
            next_session: 0,
        }
    }

    /// 登记一个新连接
    /// 失败时注册表不做任何修改
    pub fn register(
        &mut self,
        identity: &str,
        conn_tx: Sender<Outgoing>,
        peer_addr: SocketAddr,
    ) -> Result<SlotRef, Error> {
        let index = *self
            .index
            .get(identity)
            .ok_or_else(|| Error::UnknownIdentity(identity.into()))?;

        let slot = &mut self.slots[index];
        if slot.live.is_some() {
            return Err(Error::AlreadyConnected(identity.into()));
        }

        let session = self.next_session;
        self.next_session += 1;
        slot.live = Some(Live {
            session,
            conn_tx,
            peer_addr,
        });
        self.connected += 1;

        Ok(SlotRef { index, session })
    }

    /// 连接断开
    /// 槽位已经被挤掉或者换成了新的连接时不做处理，返回 false
    pub fn unregister(&mut self, slot: SlotRef) -> bool {
        let entry = match self.slots.get_mut(slot.index) {
            Some(entry) => entry,
            None => return false,
        };
        match &entry.live {
            Some(live) if live.session == slot.session => {
                entry.live = None;
                self.connected -= 1;
                true
            }
            _ => false,
        }
    }

    /// 把槽位强制标记为断开，返回旧连接的发送端，用于通知旧连接退出
    pub fn evict(&mut self, identity: &str) -> Option<Sender<Outgoing>> {
        let index = *self.index.get(identity)?;
        let live = self.slots[index].live.take()?;
        self.connected -= 1;
        Some(live.conn_tx)
    }

    /// 该连接是否仍然占有槽位
    pub fn is_current(&self, slot: SlotRef) -> bool {
        self.slots
            .get(slot.index)
            .and_then(|entry| entry.live.as_ref())
            .map_or(false, |live| live.session == slot.session)
    }

    /// 查找在线身份的发送端
    pub fn lookup(&self, identity: &str) -> Option<&Sender<Outgoing>> {
        let index = *self.index.get(identity)?;
        self.slots[index].live.as_ref().map(|live| &live.conn_tx)
    }

    /// 所有在线连接的发送端，按目录顺序
    pub fn connected_handles(&self) -> impl Iterator<Item = (&str, &Sender<Outgoing>)> {
        self.slots.iter().filter_map(|slot| {
            slot.live
                .as_ref()
                .map(|live| (slot.identity.as_str(), &live.conn_tx))
        })
    }

    /// 按目录顺序返回 (identity, 是否在线)
    pub fn snapshot(&self) -> Vec<(String, bool)> {
        self.slots
            .iter()
            .map(|slot| (slot.identity.clone(), slot.is_connected()))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.connected
    }

    pub fn slot(&self, identity: &str) -> Option<&Slot> {
        self.index.get(identity).map(|&i| &self.slots[i])
    }

    pub fn slot_at(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    fn registry() -> Registry {
        Registry::new(["SERVER_SQL", "JETSON", "BOX_ARD"])
    }

    #[test]
    fn register_and_unregister() {
        let mut registry = registry();
        let (tx, _rx) = mpsc::channel(1);

        let slot = registry.register("JETSON", tx, addr()).unwrap();
        assert_eq!(slot.index, 1);
        assert_eq!(registry.count(), 1);
        assert!(registry.lookup("JETSON").is_some());
        assert_eq!(registry.slot("JETSON").unwrap().peer_addr(), Some(addr()));

        assert!(registry.unregister(slot));
        assert_eq!(registry.count(), 0);
        assert!(registry.lookup("JETSON").is_none());
        // 重复断开不影响计数
        assert!(!registry.unregister(slot));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn unknown_identity_does_not_mutate() {
        let mut registry = registry();
        let (tx, _rx) = mpsc::channel(1);

        let err = registry.register("INTRUDER", tx, addr()).unwrap_err();
        assert_eq!(err, Error::UnknownIdentity("INTRUDER".into()));
        assert_eq!(registry.count(), 0);
        assert!(registry.snapshot().iter().all(|(_, connected)| !connected));
    }

    #[test]
    fn single_session_per_identity() {
        let mut registry = registry();
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);

        let first = registry.register("BOX_ARD", tx1, addr()).unwrap();
        let err = registry.register("BOX_ARD", tx2, addr()).unwrap_err();
        assert_eq!(err, Error::AlreadyConnected("BOX_ARD".into()));
        assert_eq!(registry.count(), 1);

        // 挤掉旧连接后，旧连接的断开不能清掉新连接
        assert!(registry.evict("BOX_ARD").is_some());
        assert_eq!(registry.count(), 0);
        assert!(!registry.is_current(first));
        let (tx3, _rx3) = mpsc::channel(1);
        let second = registry.register("BOX_ARD", tx3, addr()).unwrap();
        assert_ne!(first.session, second.session);
        assert!(!registry.unregister(first));
        assert_eq!(registry.count(), 1);
        assert!(registry.unregister(second));
    }

    #[test]
    fn snapshot_follows_catalogue_order() {
        let mut registry = registry();
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);
        registry.register("BOX_ARD", tx1, addr()).unwrap();
        registry.register("SERVER_SQL", tx2, addr()).unwrap();

        assert_eq!(
            registry.snapshot(),
            vec![
                ("SERVER_SQL".to_owned(), true),
                ("JETSON".to_owned(), false),
                ("BOX_ARD".to_owned(), true),
            ]
        );
        let online: Vec<_> = registry.connected_handles().map(|(id, _)| id).collect();
        assert_eq!(online, vec!["SERVER_SQL", "BOX_ARD"]);
    }

    #[test]
    fn duplicate_catalogue_entries_are_ignored() {
        let registry = Registry::new(["A", "B", "A"]);
        assert_eq!(registry.snapshot().len(), 2);
        assert_eq!(registry.slot("B").unwrap().index(), 1);
    }
}
