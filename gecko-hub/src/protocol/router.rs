use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use tokio::sync::mpsc::{error::TrySendError, Receiver, Sender};

use crate::network::envelope::{Address, Envelope};

use super::{
    registry::{self, Registry, SlotRef},
    ConnAck, Incoming, Outgoing, ALREADY_CONNECTED, DIRECTORY_MARKER, NOT_REGISTERED,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Requester {0} is not connected")]
    RequesterNotConnected(String),
    #[error("Failed to queue outgoing message: {0}")]
    Queue(#[from] TrySendError<Outgoing>),
}

/// 处理身份登记和消息路由
/// 注册表只由 router 持有，所有读写在事件循环中串行执行
/// router 从不直接写 socket，只把数据放入目的连接的发送队列，由连接自己写出
pub(crate) struct Router {
    registry: Registry,
    /// 各个客户端连接发送过来需要处理的数据
    router_rx: Receiver<Incoming>,
}

impl Router {
    pub(crate) fn new(registry: Registry, router_rx: Receiver<Incoming>) -> Self {
        Self {
            registry,
            router_rx,
        }
    }

    /// 开始 router 逻辑处理循环，所有连接都退出后结束
    pub(crate) async fn start(mut self) {
        while let Some(incoming) = self.router_rx.recv().await {
            self.handle_incoming(incoming);
        }
        debug!("router channel closed");
    }

    /// 分发处理
    fn handle_incoming(&mut self, incoming: Incoming) {
        match incoming {
            Incoming::Connect {
                identity,
                peer_addr,
                conn_tx,
            } => self.handle_connect(identity, peer_addr, conn_tx),
            Incoming::Data { slot, envelope } => {
                // 已被挤掉的连接发来的消息不再转发
                if !self.registry.is_current(slot) {
                    debug!("drop message from stale session of {}", envelope.sender);
                    return;
                }
                self.dispatch(&envelope);
            }
            Incoming::Disconnect { slot } => self.handle_disconnect(slot),
        }
    }

    /// 处理身份握手
    fn handle_connect(
        &mut self,
        identity: String,
        peer_addr: SocketAddr,
        conn_tx: Sender<Outgoing>,
    ) {
        let ack = match self.registry.register(&identity, conn_tx.clone(), peer_addr) {
            Ok(slot) => {
                let notice = format!(
                    "[{}] connected! (IP:{}, connections:{})\n",
                    identity,
                    peer_addr.ip(),
                    self.registry.count()
                );
                info!("{}", notice.trim_end());
                ConnAck::Accepted { slot, notice }
            }
            Err(registry::Error::UnknownIdentity(_)) => {
                let notice = format!("{} {}\n", identity, NOT_REGISTERED);
                warn!("{}", notice.trim_end());
                ConnAck::Rejected { notice }
            }
            Err(registry::Error::AlreadyConnected(_)) => {
                // 新连接被拒绝，旧连接同时被挤掉
                if let Some(stale) = self.registry.evict(&identity) {
                    let _ = stale.try_send(Outgoing::Disconnect);
                }
                let notice = format!("[{}] {}\n", identity, ALREADY_CONNECTED);
                warn!("{}", notice.trim_end());
                ConnAck::Rejected { notice }
            }
        };

        let accepted = match &ack {
            ConnAck::Accepted { slot, .. } => Some(*slot),
            ConnAck::Rejected { .. } => None,
        };
        if conn_tx.try_send(Outgoing::ConnAck(ack)).is_err() {
            // 握手中的连接已经退出，撤销登记
            if let Some(slot) = accepted {
                self.registry.unregister(slot);
            }
            warn!("connection of {} closed during handshake", identity);
        }
    }

    /// 处理连接断开
    fn handle_disconnect(&mut self, slot: SlotRef) {
        let (identity, peer_addr) = match self.registry.slot_at(slot.index) {
            Some(entry) => (entry.identity().to_owned(), entry.peer_addr()),
            None => return,
        };
        if self.registry.unregister(slot) {
            info!(
                "disconnect ID:{} (IP:{}, connections:{})",
                identity,
                peer_addr.map(|a| a.ip().to_string()).unwrap_or_default(),
                self.registry.count()
            );
        }
    }

    /// 路由一条消息，返回成功放入发送队列的次数
    pub(crate) fn dispatch(&mut self, envelope: &Envelope) -> usize {
        match &envelope.recipient {
            Address::Broadcast => {
                let frame = Bytes::from(envelope.encode());
                self.registry
                    .connected_handles()
                    .filter(|(identity, conn_tx)| deliver(identity, conn_tx, frame.clone()))
                    .count()
            }
            Address::Directory => match self.directory(envelope) {
                Ok(()) => 1,
                Err(e) => {
                    warn!("directory request from {} dropped: {}", envelope.sender, e);
                    0
                }
            },
            Address::Directed(identity) => match self.registry.lookup(identity) {
                Some(conn_tx) => {
                    deliver(identity, conn_tx, Bytes::from(envelope.encode())) as usize
                }
                None => {
                    debug!("recipient {} not connected, message dropped", identity);
                    0
                }
            },
        }
    }

    /// 在线列表，只回复给请求方
    fn directory(&self, envelope: &Envelope) -> Result<(), Error> {
        let conn_tx = self
            .registry
            .lookup(&envelope.sender)
            .ok_or_else(|| Error::RequesterNotConnected(envelope.sender.clone()))?;

        let mut payload = &envelope.payload[..];
        while let [rest @ .., b'\r' | b'\n'] = payload {
            payload = rest;
        }
        let mut line = BytesMut::new();
        if payload.is_empty() {
            line.extend_from_slice(DIRECTORY_MARKER.as_bytes());
        } else {
            line.extend_from_slice(payload);
        }
        for (identity, connected) in self.registry.snapshot() {
            if connected {
                line.extend_from_slice(b" ");
                line.extend_from_slice(identity.as_bytes());
            }
        }
        line.extend_from_slice(b"\n");

        Ok(conn_tx.try_send(Outgoing::Data(line.freeze()))?)
    }
}

/// 放入目的连接的发送队列，队列满或者连接已关闭时丢弃
fn deliver(identity: &str, conn_tx: &Sender<Outgoing>, frame: Bytes) -> bool {
    match conn_tx.try_send(Outgoing::Data(frame)) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!("outbound queue of {} is full, message dropped", identity);
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!("connection of {} already closed, message dropped", identity);
            false
        }
    }
}
