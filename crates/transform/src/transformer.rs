use attribution_core::channels::ChannelSet;
use attribution_core::types::{RawTouchpoint, TransformError, TransformedRecord};
use chrono::NaiveDateTime;
use tracing::{debug, warn};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Also accepted on input; normalized to `TIME_FORMAT` on output.
const TIME_FORMAT_ISO_T: &str = "%Y-%m-%dT%H:%M:%S";

/// Validates raw touchpoints and maps them into API-ready journey entries.
///
/// Every input record lands in exactly one of the two output lists: either
/// it becomes a `TransformedRecord`, or it is excluded with a
/// `TransformError` naming the reason. The caller decides whether the error
/// count crosses an acceptable threshold.
pub struct Transformer {
    channels: ChannelSet,
}

impl Transformer {
    pub fn new(channels: ChannelSet) -> Self {
        Self { channels }
    }

    pub fn transform(
        &self,
        raw: &[RawTouchpoint],
    ) -> (Vec<TransformedRecord>, Vec<TransformError>) {
        let mut records = Vec::with_capacity(raw.len());
        let mut errors = Vec::new();

        for touchpoint in raw {
            match self.transform_one(touchpoint) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    warn!(
                        session_id = %touchpoint.session_id,
                        %reason,
                        "Excluding touchpoint from batch"
                    );
                    errors.push(TransformError {
                        session_id: touchpoint.session_id.clone(),
                        reason,
                    });
                }
            }
        }

        debug!(
            transformed = records.len(),
            excluded = errors.len(),
            "Transform pass complete"
        );
        (records, errors)
    }

    fn transform_one(&self, touchpoint: &RawTouchpoint) -> Result<TransformedRecord, String> {
        if touchpoint.session_id.trim().is_empty() {
            return Err("empty session_id".to_string());
        }
        if !self.channels.is_known(&touchpoint.channel) {
            return Err(format!("unknown channel '{}'", touchpoint.channel));
        }
        let timestamp = parse_timestamp(&touchpoint.timestamp)
            .ok_or_else(|| format!("unparseable timestamp '{}'", touchpoint.timestamp))?;

        let conversion_id = touchpoint
            .conversion_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(&touchpoint.session_id)
            .to_string();

        Ok(TransformedRecord {
            conversion_id,
            session_id: touchpoint.session_id.clone(),
            timestamp: timestamp.format(TIME_FORMAT).to_string(),
            channel_label: touchpoint.channel.clone(),
            holder_engagement: touchpoint.holder_engagement,
            closer_engagement: touchpoint.closer_engagement,
            conversion: i64::from(touchpoint.conversion),
            impression_interaction: touchpoint.impression_interaction,
        })
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, TIME_FORMAT_ISO_T))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touchpoint(session_id: &str, channel: &str, timestamp: &str) -> RawTouchpoint {
        RawTouchpoint {
            session_id: session_id.to_string(),
            user_id: "user-1".to_string(),
            conversion_id: None,
            channel: channel.to_string(),
            timestamp: timestamp.to_string(),
            conversion: false,
            holder_engagement: 0,
            closer_engagement: 1,
            impression_interaction: 0,
            revenue: 0.0,
        }
    }

    fn transformer() -> Transformer {
        Transformer::new(ChannelSet::default())
    }

    #[test]
    fn test_valid_touchpoint_maps_to_api_schema() {
        let mut tp = touchpoint("s1", "Direct", "2023-08-01 10:00:00");
        tp.conversion = true;
        tp.conversion_id = Some("c1".to_string());

        let (records, errors) = transformer().transform(&[tp]);
        assert!(errors.is_empty());
        assert_eq!(
            records,
            vec![TransformedRecord {
                conversion_id: "c1".to_string(),
                session_id: "s1".to_string(),
                timestamp: "2023-08-01 10:00:00".to_string(),
                channel_label: "Direct".to_string(),
                holder_engagement: 0,
                closer_engagement: 1,
                conversion: 1,
                impression_interaction: 0,
            }]
        );
    }

    #[test]
    fn test_iso_t_timestamp_is_normalized() {
        let tp = touchpoint("s1", "SEO", "2023-08-01T10:00:00");
        let (records, errors) = transformer().transform(&[tp]);
        assert!(errors.is_empty());
        assert_eq!(records[0].timestamp, "2023-08-01 10:00:00");
    }

    #[test]
    fn test_missing_conversion_id_falls_back_to_session() {
        let tp = touchpoint("s7", "Display", "2023-08-01 10:00:00");
        let (records, _) = transformer().transform(&[tp]);
        assert_eq!(records[0].conversion_id, "s7");
    }

    #[test]
    fn test_empty_session_id_is_excluded() {
        let tp = touchpoint("  ", "Direct", "2023-08-01 10:00:00");
        let (records, errors) = transformer().transform(&[tp]);
        assert!(records.is_empty());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].reason, "empty session_id");
    }

    #[test]
    fn test_unknown_channel_is_excluded() {
        let tp = touchpoint("s1", "Skywriting", "2023-08-01 10:00:00");
        let (records, errors) = transformer().transform(&[tp]);
        assert!(records.is_empty());
        assert!(errors[0].reason.contains("Skywriting"));
    }

    #[test]
    fn test_bad_timestamp_is_excluded() {
        let tp = touchpoint("s1", "Direct", "yesterday-ish");
        let (records, errors) = transformer().transform(&[tp]);
        assert!(records.is_empty());
        assert!(errors[0].reason.contains("unparseable timestamp"));
    }

    #[test]
    fn test_every_input_lands_exactly_once() {
        let inputs = vec![
            touchpoint("s1", "Direct", "2023-08-01 10:00:00"),
            touchpoint("", "Direct", "2023-08-01 10:00:00"),
            touchpoint("s3", "Morse_Code", "2023-08-01 10:00:00"),
            touchpoint("s4", "SEO", "not a date"),
            touchpoint("s5", "Affiliate", "2023-08-02 12:30:00"),
        ];
        let (records, errors) = transformer().transform(&inputs);
        assert_eq!(records.len() + errors.len(), inputs.len());
        assert_eq!(records.len(), 2);
        assert_eq!(errors.len(), 3);
    }
}
