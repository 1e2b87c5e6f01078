//! 队列消息编解码
//!
//! 事件与奖励在队列中使用 bincode 二进制编码。

use rule_engine::{Event, Reward};

use crate::error::{Result, WorkerError};

pub fn encode_event(event: &Event) -> Result<Vec<u8>> {
    bincode::serialize(event).map_err(WorkerError::Encode)
}

pub fn decode_event(bytes: &[u8]) -> Result<Event> {
    bincode::deserialize(bytes).map_err(WorkerError::Decode)
}

pub fn encode_reward(reward: &Reward) -> Result<Vec<u8>> {
    bincode::serialize(reward).map_err(WorkerError::Encode)
}

pub fn decode_reward(bytes: &[u8]) -> Result<Reward> {
    bincode::deserialize(bytes).map_err(WorkerError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rule_engine::{Condition, Operator, Rule};

    fn sample_event() -> Event {
        Event::new("level_up", Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 15).unwrap())
            .with_meta("level", "7")
            .with_meta("tier", "gold")
            .with_meta("nickname", "玩家 一号")
    }

    #[test]
    fn test_event_round_trip_preserves_fields() {
        let event = sample_event();
        let decoded = decode_event(&encode_event(&event).unwrap()).unwrap();

        assert_eq!(decoded, event);
        assert_eq!(decoded.meta.len(), 3);
        assert_eq!(decoded.timestamp, event.timestamp);
    }

    #[test]
    fn test_reward_carries_rule_and_event() {
        let rule = Rule {
            id: "r1".to_string(),
            message: "Reached level 5".to_string(),
            conditions: vec![Condition::new("level", Operator::GreaterThanOrEqual, "5")],
            reward: 50,
            start_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 0).unwrap(),
        };
        let reward = Reward::new(sample_event(), rule);

        let decoded = decode_reward(&encode_reward(&reward).unwrap()).unwrap();
        assert_eq!(decoded.amount, 50);
        assert_eq!(decoded.rule.conditions[0].operator, Operator::GreaterThanOrEqual);
        assert_eq!(decoded, reward);
    }

    #[test]
    fn test_corrupt_bytes_are_decode_errors() {
        assert!(matches!(decode_event(&[]), Err(WorkerError::Decode(_))));
        assert!(matches!(
            decode_event(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]),
            Err(WorkerError::Decode(_))
        ));

        // 截断的合法消息同样无法解码
        let bytes = encode_event(&sample_event()).unwrap();
        assert!(matches!(
            decode_event(&bytes[..bytes.len() / 2]),
            Err(WorkerError::Decode(_))
        ));
    }
}
