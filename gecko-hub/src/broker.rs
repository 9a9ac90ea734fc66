use std::{net::SocketAddr, sync::Arc, time::Duration};

use log::{debug, error, info, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, Semaphore},
};

use crate::{
    config::Config,
    error::Error,
    network::{self, ClientEventLoop},
    protocol::{Incoming, Registry, Router},
    Hook, HookNoop,
};

/// 代表一个中转节点
pub struct Broker {
    cfg: Config,
}

impl Broker {
    pub fn new(cfg: Config) -> Self {
        Self { cfg }
    }

    pub async fn start(&self) -> Result<(), Error> {
        self.start_with_hook(Arc::new(HookNoop)).await
    }

    pub async fn start_with_hook<H: Hook>(&self, hook: Arc<H>) -> Result<(), Error> {
        self.cfg.validate()?;
        let listener = TcpListener::bind(&self.cfg.broker.listen_addr).await?;
        info!("listening on {}", listener.local_addr()?);
        self.serve(listener, hook).await
    }

    /// 在已绑定的 listener 上开始服务，不会主动退出
    pub async fn serve<H: Hook>(
        &self,
        listener: TcpListener,
        hook: Arc<H>,
    ) -> Result<(), Error> {
        // router 后台协程
        let (router_tx, router_rx) = mpsc::channel(1000);
        let registry = Registry::new(self.cfg.catalogue.identities.iter().cloned());
        tokio::spawn(async move {
            debug!("start router loop");
            Router::new(registry, router_rx).start().await
        });

        // 同时打开的连接数上限，握手中的连接也占用名额
        let permits = Arc::new(Semaphore::new(self.cfg.broker.max_connections));
        let max_frame_len = self.cfg.broker.max_frame_len;
        let idle_timeout = self.cfg.idle_timeout();

        debug!("start client accept loop");
        loop {
            // 获取到连接
            let (stream, addr) = match listener.accept().await {
                Ok((s, a)) => (s, a),
                Err(e) => {
                    error!("accept tcp stream err: {}", e);
                    continue;
                }
            };

            // 超过上限的连接不读取任何数据，直接关闭
            let permit = match permits.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("connection limit reached, closing stream from {}", addr);
                    drop(stream);
                    continue;
                }
            };
            info!("new stream coming in: {}", addr);

            // 事件循环
            let client_router_tx = router_tx.clone();
            let client_hook = hook.clone();
            tokio::spawn(async move {
                let _permit = permit;
                handle_client(
                    stream,
                    addr,
                    client_router_tx,
                    client_hook,
                    max_frame_len,
                    idle_timeout,
                )
                .await
            });
        }
    }
}

async fn handle_client<H: Hook>(
    stream: TcpStream,
    addr: SocketAddr,
    router_tx: mpsc::Sender<Incoming>,
    hook: Arc<H>,
    max_frame_len: usize,
    idle_timeout: Option<Duration>,
) {
    let event_loop = match ClientEventLoop::new(
        stream,
        addr,
        router_tx,
        hook,
        max_frame_len,
        idle_timeout,
    )
    .await
    {
        Ok(event_loop) => event_loop,
        Err(network::Error::Rejected(notice)) => {
            debug!("handshake from {} rejected: {}", addr, notice);
            return;
        }
        Err(e) => {
            warn!("handshake from {} failed: {}", addr, e);
            return;
        }
    };

    if let Err(e) = event_loop.run().await {
        error!("eventloop on client {} exit error: {}", addr, e)
    }
}
