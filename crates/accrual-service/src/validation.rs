//! 订单号校验
//!
//! 订单号须为通过 Luhn 校验的十进制数字串。

/// Luhn 校验
///
/// 忽略首尾空白；从左到右遍历，下标奇偶性与 `len % 2` 相同的数字乘 2，
/// 超过 9 则减 9；所有数字之和能被 10 整除即合法。任何非数字字符直接判为非法。
pub fn is_valid_order_number(raw: &str) -> bool {
    let number = raw.trim();
    if number.is_empty() {
        return false;
    }

    let parity = number.len() % 2;
    let mut sum: u32 = 0;

    for (i, ch) in number.chars().enumerate() {
        let Some(mut digit) = ch.to_digit(10) else {
            return false;
        };

        if i % 2 == parity {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
    }

    sum % 10 == 0
}
