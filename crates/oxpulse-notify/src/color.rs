use oxpulse_common::types::Severity;

/// Side-bar colour used by visual channels (Slack attachments, HTML email).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeverityColor {
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
}

impl SeverityColor {
    pub fn for_severity(severity: Severity) -> Self {
        match severity {
            Severity::Critical => Self::Red,
            Severity::High => Self::Orange,
            Severity::Medium => Self::Yellow,
            Severity::Low => Self::Green,
            Severity::Info => Self::Blue,
        }
    }

    pub fn hex(&self) -> &'static str {
        match self {
            Self::Red => "#d32f2f",
            Self::Orange => "#f57c00",
            Self::Yellow => "#fbc02d",
            Self::Green => "#388e3c",
            Self::Blue => "#1976d2",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_table() {
        assert_eq!(SeverityColor::for_severity(Severity::Critical), SeverityColor::Red);
        assert_eq!(SeverityColor::for_severity(Severity::High), SeverityColor::Orange);
        assert_eq!(SeverityColor::for_severity(Severity::Medium), SeverityColor::Yellow);
        assert_eq!(SeverityColor::for_severity(Severity::Low), SeverityColor::Green);
        assert_eq!(SeverityColor::for_severity(Severity::Info), SeverityColor::Blue);
        assert!(SeverityColor::Red.hex().starts_with('#'));
    }
}
