//! 存储端收到的磨损测量数据
//!
//! 格式：`[sender -> SERVER_SQL] image_path:<path> wear_percentage:<float> timestamp:<int>`

use std::str::FromStr;

use crate::network::envelope::{Delivery, STORAGE};

/// 鞋柜端身份
pub const BOX: &str = "BOX_ARD";

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Not a routed storage message")]
    NotRouted,
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub sender: String,
    pub image_path: String,
    pub wear_percentage: f32,
    pub timestamp: i64,
}

/// 根据磨损程度发给鞋柜的指令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxCommand {
    Open50,
    Open70,
}

impl BoxCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoxCommand::Open50 => "OPEN_50",
            BoxCommand::Open70 => "OPEN_70",
        }
    }
}

impl Measurement {
    /// 磨损 50% 以下不需要处理
    pub fn box_command(&self) -> Option<BoxCommand> {
        if self.wear_percentage >= 70.0 {
            Some(BoxCommand::Open70)
        } else if self.wear_percentage >= 50.0 {
            Some(BoxCommand::Open50)
        } else {
            None
        }
    }
}

impl FromStr for Measurement {
    type Err = Error;

    fn from_str(frame: &str) -> Result<Self, Self::Err> {
        let delivery = Delivery::parse(frame.trim_end()).ok_or(Error::NotRouted)?;
        if delivery.recipient.as_deref() != Some(STORAGE) {
            return Err(Error::NotRouted);
        }

        let field = |name: &'static str| {
            delivery
                .payload
                .split_whitespace()
                .find_map(|token| token.strip_prefix(name)?.strip_prefix(':'))
                .ok_or(Error::MissingField(name))
        };

        let image_path = field("image_path")?.to_owned();
        let wear = field("wear_percentage")?;
        let wear_percentage = wear
            .parse()
            .map_err(|_| Error::InvalidValue("wear_percentage", wear.into()))?;
        let timestamp = field("timestamp")?;
        let timestamp = timestamp
            .parse()
            .map_err(|_| Error::InvalidValue("timestamp", timestamp.into()))?;

        Ok(Self {
            sender: delivery.sender,
            image_path,
            wear_percentage,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_measurement() {
        let m: Measurement =
            "[JETSON -> SERVER_SQL] image_path:shoe_1.jpg wear_percentage:62.50 timestamp:1700000000\n"
                .parse()
                .unwrap();
        assert_eq!(
            m,
            Measurement {
                sender: "JETSON".into(),
                image_path: "shoe_1.jpg".into(),
                wear_percentage: 62.5,
                timestamp: 1_700_000_000,
            }
        );
        assert_eq!(m.box_command(), Some(BoxCommand::Open50));
    }

    #[test]
    fn parse_errors() {
        assert_eq!(
            "[JETSON] image_path:a.jpg".parse::<Measurement>(),
            Err(Error::NotRouted)
        );
        assert_eq!(
            "[JETSON -> SERVER_SQL] image_path:a.jpg timestamp:1".parse::<Measurement>(),
            Err(Error::MissingField("wear_percentage"))
        );
        assert_eq!(
            "[JETSON -> SERVER_SQL] image_path:a.jpg wear_percentage:high timestamp:1"
                .parse::<Measurement>(),
            Err(Error::InvalidValue("wear_percentage", "high".into()))
        );
    }

    #[test]
    fn box_command_thresholds() {
        let mut m = Measurement {
            sender: "JETSON".into(),
            image_path: "a.jpg".into(),
            wear_percentage: 49.9,
            timestamp: 0,
        };
        assert_eq!(m.box_command(), None);
        m.wear_percentage = 50.0;
        assert_eq!(m.box_command(), Some(BoxCommand::Open50));
        m.wear_percentage = 70.0;
        assert_eq!(m.box_command().map(|c| c.as_str()), Some("OPEN_70"));
    }
}
