//! 日志脱敏
//! 地址、签名、私钥等写入日志前统一经过这里

/// 脱敏地址（显示前6位和后4位）
pub fn redact_address(address: &str) -> String {
    if address.len() < 10 || !address.is_ascii() {
        return "*".repeat(address.chars().count());
    }

    let prefix = &address[..6];
    let suffix = &address[address.len() - 4..];
    format!("{}...{}", prefix, suffix)
}

/// 脱敏email
pub fn redact_email(email: &str) -> String {
    if let Some(at_pos) = email.find('@') {
        let local = &email[..at_pos];
        let domain = &email[at_pos..];

        if local.chars().count() <= 2 {
            format!("**{}", domain)
        } else {
            let first: String = local.chars().take(1).collect();
            format!("{}***{}", first, domain)
        }
    } else {
        "***@***".to_string()
    }
}

/// 签名只记录长度
pub fn redact_signature(signature: &str) -> String {
    format!("<signature len={}>", signature.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_address() {
        assert_eq!(
            redact_address("dydx1qyqszqgpqyqszqgpqyqszqgpqyqszqgp"),
            "dydx1q...zqgp"
        );
        assert_eq!(redact_address("0xabc"), "*****");
    }

    #[test]
    fn test_redact_email() {
        assert_eq!(redact_email("alice@example.com"), "a***@example.com");
        assert_eq!(redact_email("al@example.com"), "**@example.com");
        assert_eq!(redact_email("nobody"), "***@***");
    }

    #[test]
    fn test_redact_signature() {
        assert_eq!(redact_signature("0xdeadbeef"), "<signature len=10>");
    }
}
