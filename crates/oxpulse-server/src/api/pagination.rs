use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};

const DEFAULT_PAGE_LIMIT: u64 = 20;
const MAX_PAGE_LIMIT: u64 = 1000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginationParams {
    /// 每页条数，默认 20
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    pub limit: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    pub offset: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum U64Input {
    Number(u64),
    Text(String),
}

/// 同时接受数字和数字字符串（查询参数只会是字符串）
pub fn deserialize_optional_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<U64Input>::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(U64Input::Number(number)) => Ok(Some(number)),
        Some(U64Input::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(U64Input::Text(text)) => text
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(DeError::custom),
    }
}

impl PaginationParams {
    pub fn resolve_limit(limit: Option<u64>) -> usize {
        limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT) as usize
    }

    pub fn resolve_offset(offset: Option<u64>) -> usize {
        offset.unwrap_or(0) as usize
    }

    pub fn limit(&self) -> usize {
        Self::resolve_limit(self.limit)
    }

    pub fn offset(&self) -> usize {
        Self::resolve_offset(self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_defaulted_and_capped() {
        assert_eq!(PaginationParams::resolve_limit(None), 20);
        assert_eq!(PaginationParams::resolve_limit(Some(5000)), 1000);
        assert_eq!(PaginationParams::resolve_offset(None), 0);
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let p: PaginationParams = serde_json::from_str(r#"{"limit":"15","offset":3}"#).unwrap();
        assert_eq!(p.limit(), 15);
        assert_eq!(p.offset(), 3);
        assert!(serde_json::from_str::<PaginationParams>(r#"{"limit":"ten"}"#).is_err());
    }
}
