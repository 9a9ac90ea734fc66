//! 一个按身份转发短消息的 tcp 中转服务库
//!
//! 每个客户端以目录中的一个固定身份登录，之后通过 `[to]:message` 互相发送消息，
//! `ALLMSG` 广播给所有在线客户端，`IDLIST` 查询在线列表

use async_trait::async_trait;

pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod measurement;
pub mod network;
pub mod protocol;

/// 连接事件发生时的回调，由用户实现
#[async_trait]
pub trait Hook: Send + Sync + 'static {
    /// 客户端登记成功
    async fn connected(&self, identity: &str);
    /// 客户端连接断开
    async fn disconnected(&self, identity: &str);
}

pub struct HookNoop;

#[async_trait]
impl Hook for HookNoop {
    async fn connected(&self, _identity: &str) {}
    async fn disconnected(&self, _identity: &str) {}
}
