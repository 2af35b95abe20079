/// 消息列表分页参数
///
/// 缺失、非数字或为 0 的 limit 都视为未指定，由服务使用配置中的默认值。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRequest {
    limit: Option<u32>,
    offset: u32,
}

impl PageRequest {
    pub fn new(limit: Option<u32>, offset: u32) -> Self {
        Self {
            limit: limit.filter(|value| *value > 0),
            offset,
        }
    }

    /// 解析查询字符串中的原始参数
    pub fn parse(limit: Option<&str>, offset: Option<&str>) -> Self {
        let limit = limit.and_then(|raw| raw.trim().parse::<u32>().ok());
        let offset = offset
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .unwrap_or(0);
        Self::new(limit, offset)
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn effective_limit(&self, default: u32, max: u32) -> u32 {
        self.limit.unwrap_or(default).min(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_bad_limit_falls_back_to_default() {
        for raw in [None, Some("abc"), Some("0"), Some("-3")] {
            let page = PageRequest::parse(raw, None);
            assert_eq!(page.effective_limit(50, 200), 50, "limit {raw:?}");
            assert_eq!(page.offset(), 0);
        }
    }

    #[test]
    fn limit_is_clamped_to_max() {
        let page = PageRequest::parse(Some("1000"), Some("20"));
        assert_eq!(page.effective_limit(50, 200), 200);
        assert_eq!(page.offset(), 20);
        assert_eq!(PageRequest::parse(Some(" 7 "), Some("x")).effective_limit(50, 200), 7);
    }
}
