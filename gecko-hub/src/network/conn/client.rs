use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use super::Error;

/// 设备与服务器之间的连接
/// 单纯的 tcp 读写管理
/// 以一次 socket 读取为一帧，每帧最多读取 max_frame_len 字节，超出部分留给下一帧
pub(crate) struct ClientConnection {
    /// tcp 连接
    stream: TcpStream,
    /// 读缓冲区
    read: BytesMut,
    /// 单帧长度上限
    max_frame_len: usize,
}

impl ClientConnection {
    pub(crate) fn new(stream: TcpStream, max_frame_len: usize) -> Self {
        Self {
            stream,
            read: BytesMut::with_capacity(max_frame_len),
            max_frame_len,
        }
    }

    /// 读取握手帧，长度上限单独指定
    pub(crate) async fn read_handshake(&mut self, limit: usize) -> Result<Bytes, Error> {
        self.read_limited(limit).await
    }

    /// 读取一帧
    pub(crate) async fn read_frame(&mut self) -> Result<Bytes, Error> {
        self.read_limited(self.max_frame_len).await
    }

    /// 写入一帧
    pub(crate) async fn write_frame(&mut self, frame: &[u8]) -> Result<(), Error> {
        self.stream.write_all(frame).await?;
        Ok(())
    }

    /// 关闭写端
    pub(crate) async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    /// 一次 socket 读取，读到 0 字节视为对端关闭
    async fn read_limited(&mut self, limit: usize) -> Result<Bytes, Error> {
        self.read.clear();
        self.read.reserve(limit);
        let read = (&mut self.stream)
            .take(limit as u64)
            .read_buf(&mut self.read)
            .await?;
        if 0 == read {
            return Err(Error::ConnectionAborted);
        }

        Ok(self.read.split().freeze())
    }
}
