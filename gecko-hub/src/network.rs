//! 网络层
//! 本层只关心连接的读写与生命周期，路由相关逻辑交给协议层

use std::{net::SocketAddr, sync::Arc};

pub(crate) use conn::ClientConnection;

use log::{debug, info};
use tokio::{
    net::TcpStream,
    select,
    sync::mpsc::{self, error::SendError, Receiver, Sender},
    time,
};

use crate::{
    protocol::{ConnAck, Incoming, Outgoing, SlotRef},
    Hook,
};

use self::envelope::Envelope;

pub(crate) mod conn;
pub mod envelope;

/// 握手帧长度上限，`[` + 20 字节身份 + `]`
pub const HANDSHAKE_FRAME_LEN: usize = 22;
/// 每个连接的发送队列长度
const OUTGOING_CAPACITY: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unexpected router message")]
    UnexpectedRouterMessage,
    #[error("Router closed")]
    RouterClosed,
    #[error("Connection error: {0}")]
    Connection(#[from] conn::Error),
    #[error("Empty identity frame")]
    EmptyIdentity,
    #[error("Handshake rejected: {0}")]
    Rejected(String),
    #[error("Send message to router error: {0}")]
    SendIncoming(#[from] SendError<Incoming>),
}

/// 一个已完成握手的客户端连接
/// 握手在 new 中完成，start 中只处理数据转发
pub(crate) struct ClientEventLoop<H: Hook> {
    identity: String,
    slot: SlotRef,
    conn: ClientConnection,
    router_tx: Sender<Incoming>,
    hook: Arc<H>,
    conn_rx: Receiver<Outgoing>,
    idle_timeout: Option<time::Duration>,
}

impl<H: Hook> ClientEventLoop<H> {
    /// 握手
    /// * 读取身份帧，读取失败或者身份为空直接关闭，不做登记
    /// * 交给 router 登记，并把 router 的通知原样写回客户端
    /// * 登记失败时关闭连接，登记成功但通知写失败时撤销登记
    pub(crate) async fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        router_tx: Sender<Incoming>,
        hook: Arc<H>,
        max_frame_len: usize,
        idle_timeout: Option<time::Duration>,
    ) -> Result<Self, Error> {
        let mut conn = ClientConnection::new(stream, max_frame_len);

        // 第一帧，必须是身份
        let frame = conn.read_handshake(HANDSHAKE_FRAME_LEN).await?;
        let identity = match envelope::parse_identity(&frame) {
            Some(identity) => identity,
            None => {
                conn.shutdown().await;
                return Err(Error::EmptyIdentity);
            }
        };
        debug!("received identity {} from {}", identity, peer_addr);

        // conn_tx 由 router 持有，用于给当前这个连接发送消息
        let (conn_tx, mut conn_rx) = mpsc::channel(OUTGOING_CAPACITY);
        router_tx
            .send(Incoming::Connect {
                identity: identity.clone(),
                peer_addr,
                conn_tx,
            })
            .await?;

        // 获取 router 处理结果
        let ack = match conn_rx.recv().await {
            Some(Outgoing::ConnAck(ack)) => ack,
            Some(_) => return Err(Error::UnexpectedRouterMessage),
            None => return Err(Error::RouterClosed),
        };
        match ack {
            ConnAck::Accepted { slot, notice } => {
                // 已经登记，通知写不出去时要撤销登记
                if let Err(e) = conn.write_frame(notice.as_bytes()).await {
                    router_tx.send(Incoming::Disconnect { slot }).await?;
                    return Err(e.into());
                }
                hook.connected(&identity).await;
                Ok(Self {
                    identity,
                    slot,
                    conn,
                    router_tx,
                    hook,
                    conn_rx,
                    idle_timeout,
                })
            }
            ConnAck::Rejected { notice } => {
                conn.write_frame(notice.as_bytes()).await?;
                conn.shutdown().await;
                Err(Error::Rejected(notice.trim_end().to_owned()))
            }
        }
    }

    /// 运行事件循环，退出后关闭连接并通知 router 注销
    pub(crate) async fn run(mut self) -> Result<(), Error> {
        let result = self.start().await;

        self.conn.shutdown().await;
        let disconnect = self
            .router_tx
            .send(Incoming::Disconnect { slot: self.slot })
            .await;
        self.hook.disconnected(&self.identity).await;

        result.and(disconnect.map_err(Error::from))
    }

    /// 事件循环
    /// * 从 socket 读取消息，解析后发送给 router
    /// * 接收 router 转发过来的消息，写入 socket
    /// * 对端关闭或者被同一身份的新连接挤掉时正常退出
    async fn start(&mut self) -> Result<(), Error> {
        // 只有收到对端数据时才顺延，转发给对端的消息不算
        let idle = time::sleep(self.idle_timeout.unwrap_or_default());
        tokio::pin!(idle);

        loop {
            select! {
                // 从网络层读数据
                reads = self.conn.read_frame() => {
                    match reads {
                        Ok(frame) => {
                            if let Some(timeout) = self.idle_timeout {
                                idle.as_mut().reset(time::Instant::now() + timeout);
                            }
                            let envelope = Envelope::decode(&frame, &self.identity);
                            info!(
                                "message: [{} -> {}] {}",
                                envelope.sender,
                                envelope.recipient,
                                envelope.payload_lossy().trim_end()
                            );
                            self.router_tx.send(Incoming::Data {
                                slot: self.slot,
                                envelope,
                            }).await?;
                        }
                        Err(conn::Error::ConnectionAborted) => return Ok(()),
                        Err(e) => return Err(Error::Connection(e)),
                    }
                }
                // 空闲超时
                () = &mut idle, if self.idle_timeout.is_some() => {
                    info!("no data from {} within {:?}, closing", self.identity, self.idle_timeout);
                    return Ok(());
                }
                // 从 router 读转发消息
                recv = self.conn_rx.recv() => {
                    match recv {
                        Some(Outgoing::Data(frame)) => self.conn.write_frame(&frame).await?,
                        Some(Outgoing::Disconnect) => {
                            info!("session of {} evicted by a new connection", self.identity);
                            return Ok(());
                        }
                        Some(Outgoing::ConnAck(_)) => return Err(Error::UnexpectedRouterMessage),
                        // 槽位被清掉后 router 不再持有发送端
                        None => {
                            debug!("outgoing queue of {} closed", self.identity);
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
