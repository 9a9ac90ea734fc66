use std::process;

use clap::Parser;
use demos::{init_logger, Env};
use gecko_hub::{
    client::Client,
    measurement::{Measurement, BOX},
    network::envelope::{DIRECTORY, STORAGE, STORAGE_MARKER},
};
use log::{error, info, warn};
use tokio::{
    io::{self, AsyncBufReadExt, BufReader},
    select,
};

/// 命令行客户端
/// * `IDLIST` 查询在线列表
/// * `to:message` 发送给指定身份
#[derive(Debug, Parser)]
#[clap(name = "hub-client", version)]
struct Args {
    /// 服务端地址，如 127.0.0.1:5000
    addr: String,
    /// 登录身份
    identity: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let env = Env::from_env();
    let _logger = match init_logger(&env) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("init logger error: {}", e);
            process::exit(1);
        }
    };

    let mut client = match Client::connect(args.addr.as_str(), &args.identity).await {
        Ok(client) => client,
        Err(e) => {
            error!("connect {} as {} error: {}", args.addr, args.identity, e);
            process::exit(1);
        }
    };
    print!("{}", client.welcome());

    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    _ => break,
                };
                let sent = if line == DIRECTORY {
                    client.list().await
                } else if let Some((to, message)) = line.split_once(':') {
                    client.send(to, message).await
                } else {
                    println!("invalid command format");
                    continue;
                };
                if let Err(e) = sent {
                    error!("send error: {}", e);
                    break;
                }
            }
            recv = client.recv() => {
                let frame = match recv {
                    Ok(Some(frame)) => String::from_utf8_lossy(&frame).into_owned(),
                    Ok(None) => {
                        info!("connection closed by server");
                        break;
                    }
                    Err(e) => {
                        error!("recv error: {}", e);
                        break;
                    }
                };
                print!("received: {}", frame);
                if client.identity() == STORAGE {
                    if let Err(e) = handle_measurement(&mut client, &frame).await {
                        error!("send box command error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    if let Err(e) = client.close().await {
        error!("close connection error: {}", e);
    }
}

/// 存储端收到测量数据后，根据磨损程度通知鞋柜
async fn handle_measurement(
    client: &mut Client,
    frame: &str,
) -> Result<(), gecko_hub::client::Error> {
    if !frame.contains(STORAGE_MARKER) {
        return Ok(());
    }
    let measurement = match frame.parse::<Measurement>() {
        Ok(m) => m,
        Err(e) => {
            warn!("invalid measurement: {}", e);
            return Ok(());
        }
    };
    info!(
        "measurement from {}: image {} wear {:.2}% at {}",
        measurement.sender,
        measurement.image_path,
        measurement.wear_percentage,
        measurement.timestamp
    );
    match measurement.box_command() {
        Some(command) => client.send(BOX, command.as_str()).await,
        None => Ok(()),
    }
}
