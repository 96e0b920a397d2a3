//! Marketing channel taxonomy.
//!
//! Channel labels form an open enumeration: the built-in set covers the
//! labels the scoring provider documents, and deployments can extend it
//! through configuration without a code change.

/// Channel labels accepted out of the box.
pub const KNOWN_CHANNELS: &[&str] = &[
    "Direct",
    "Email_NewsLetter",
    "Paid_Search_Brand",
    "Paid_Search_Non_Brand",
    "Social_Organic",
    "Social_Paid",
    "Affiliate",
    "Display",
    "Referral",
    "SEO",
];

/// Membership check over the built-in channel set plus configured extras.
#[derive(Debug, Clone, Default)]
pub struct ChannelSet {
    extra: Vec<String>,
}

impl ChannelSet {
    pub fn new(extra_channels: &[String]) -> Self {
        Self {
            extra: extra_channels.to_vec(),
        }
    }

    pub fn is_known(&self, label: &str) -> bool {
        KNOWN_CHANNELS.contains(&label) || self.extra.iter().any(|c| c == label)
    }
}
