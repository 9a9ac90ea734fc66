//! 客户端
//! 以固定身份登录中转节点，收发消息

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{self, AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, ToSocketAddrs},
};

use crate::{
    network::envelope::{BROADCAST, DIRECTORY},
    protocol::{ALREADY_CONNECTED, NOT_REGISTERED},
};

/// 单次读取的字节数上限
const READ_BUF_SIZE: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O: {0}")]
    IO(#[from] io::Error),
    #[error("Identity {0} is not registered")]
    NotRegistered(String),
    #[error("Identity {0} is already connected")]
    AlreadyConnected(String),
    #[error("Connection closed by server")]
    ConnectionClosed,
}

pub struct Client {
    identity: String,
    stream: TcpStream,
    read: BytesMut,
    /// 登录成功时服务端的通知
    welcome: String,
}

impl Client {
    /// 连接并发送身份，服务端拒绝时返回错误
    pub async fn connect<A: ToSocketAddrs>(addr: A, identity: &str) -> Result<Self, Error> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(format!("[{}]", identity).as_bytes()).await?;

        let mut client = Self {
            identity: identity.into(),
            stream,
            read: BytesMut::with_capacity(READ_BUF_SIZE),
            welcome: String::new(),
        };
        let notice = match client.recv().await? {
            Some(frame) => String::from_utf8_lossy(&frame).into_owned(),
            None => return Err(Error::ConnectionClosed),
        };
        if notice.contains(NOT_REGISTERED) {
            return Err(Error::NotRegistered(identity.into()));
        }
        if notice.contains(ALREADY_CONNECTED) {
            return Err(Error::AlreadyConnected(identity.into()));
        }
        client.welcome = notice;

        Ok(client)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn welcome(&self) -> &str {
        &self.welcome
    }

    /// 发送 `[to]:message`
    pub async fn send(&mut self, to: &str, message: &str) -> Result<(), Error> {
        self.send_raw(format!("[{}]:{}", to, message).as_bytes())
            .await
    }

    pub async fn broadcast(&mut self, message: &str) -> Result<(), Error> {
        self.send(BROADCAST, message).await
    }

    /// 查询在线列表，回复通过 recv 读取
    pub async fn list(&mut self) -> Result<(), Error> {
        self.send(DIRECTORY, "").await
    }

    /// 原样写入，不做任何封装
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    /// 读取一帧，服务端关闭连接时返回 `None`
    pub async fn recv(&mut self) -> Result<Option<Bytes>, Error> {
        self.read.clear();
        self.read.reserve(READ_BUF_SIZE);
        let read = (&mut self.stream)
            .take(READ_BUF_SIZE as u64)
            .read_buf(&mut self.read)
            .await?;
        if 0 == read {
            return Ok(None);
        }

        Ok(Some(self.read.split().freeze()))
    }

    pub async fn close(mut self) -> Result<(), Error> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
