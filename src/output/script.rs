//! Han script normalization applied to rendered captions

use crate::Result;

/// Rewrites caption text into a single script variant
pub trait ScriptConverter: Send + Sync {
    fn convert(&self, text: &str) -> Result<String>;
}

/// Traditional to simplified Chinese
#[derive(Debug, Default, Clone, Copy)]
pub struct SimplifiedChinese;

impl ScriptConverter for SimplifiedChinese {
    fn convert(&self, text: &str) -> Result<String> {
        Ok(zhconv::zhconv(text, zhconv::Variant::ZhHans))
    }
}

/// Leaves text untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl ScriptConverter for Passthrough {
    fn convert(&self, text: &str) -> Result<String> {
        Ok(text.to_string())
    }
}

/// Converted text, or the input unchanged if conversion fails
pub fn normalize(converter: &dyn ScriptConverter, text: &str) -> String {
    match converter.convert(text) {
        Ok(converted) => converted,
        Err(e) => {
            tracing::debug!("Script conversion failed, keeping original text: {:#}", e);
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl ScriptConverter for Broken {
        fn convert(&self, _text: &str) -> Result<String> {
            anyhow::bail!("conversion table unavailable")
        }
    }

    #[test]
    fn test_simplified_conversion() {
        assert_eq!(normalize(&SimplifiedChinese, "這是一個測試"), "这是一个测试");
        assert_eq!(normalize(&SimplifiedChinese, "plain ascii"), "plain ascii");
    }

    #[test]
    fn test_failure_passes_text_through() {
        assert_eq!(normalize(&Broken, "這是"), "這是");
        assert_eq!(normalize(&Passthrough, "這是"), "這是");
    }
}
