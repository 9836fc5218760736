use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentChannel {
    Bank,
    MobileBanking,
    Wallet,
}

impl PaymentChannel {
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "bank" => Ok(Self::Bank),
            "mobile_banking" => Ok(Self::MobileBanking),
            "wallet" => Ok(Self::Wallet),
            _ => anyhow::bail!("channel must be bank, mobile_banking, or wallet"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bank => "bank",
            Self::MobileBanking => "mobile_banking",
            Self::Wallet => "wallet",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplaintStatus {
    Pending,
    Assigned,
    InProgress,
    Resolved,
}

impl ComplaintStatus {
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "Pending" => Ok(Self::Pending),
            "Assigned" => Ok(Self::Assigned),
            "In Progress" => Ok(Self::InProgress),
            "Resolved" => Ok(Self::Resolved),
            _ => anyhow::bail!("unknown complaint status {value}"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Assigned => "Assigned",
            Self::InProgress => "In Progress",
            Self::Resolved => "Resolved",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_channel_storage_forms() {
        for (text, channel) in [
            ("bank", PaymentChannel::Bank),
            ("mobile_banking", PaymentChannel::MobileBanking),
            ("wallet", PaymentChannel::Wallet),
        ] {
            assert_eq!(PaymentChannel::parse(text).unwrap(), channel);
            assert_eq!(channel.as_str(), text);
        }
        assert!(PaymentChannel::parse("google_pay").is_err());
        assert!(PaymentChannel::parse("").is_err());
    }

    #[test]
    fn complaint_status_storage_forms() {
        for (text, status) in [
            ("Pending", ComplaintStatus::Pending),
            ("Assigned", ComplaintStatus::Assigned),
            ("In Progress", ComplaintStatus::InProgress),
            ("Resolved", ComplaintStatus::Resolved),
        ] {
            assert_eq!(ComplaintStatus::parse(text).unwrap(), status);
            assert_eq!(status.as_str(), text);
        }
        assert!(ComplaintStatus::parse("Closed").is_err());
    }
}
