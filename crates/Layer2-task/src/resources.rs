//! Resource envelope resolution
//!
//! Turns the string-encoded CPU/memory quantities used by operators into a
//! validated [`ResourceEnvelope`]. Unset fields stay `None` so the cluster
//! (or the service defaults) decide; nothing is ever zeroed implicitly.

use jobexec_foundation::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Kubernetes quantity grammar: decimal number plus optional suffix or exponent
fn quantity_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?P<num>[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:(?P<suffix>Ki|Mi|Gi|Ti|Pi|Ei|n|u|m|k|M|G|T|P|E)|(?P<exp>[eE][+-]?[0-9]+))?$",
        )
        .expect("quantity pattern is valid")
    })
}

/// Resource dimension a quantity applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Cpu,
    Memory,
}

/// One of the four envelope fields, used for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceField {
    LimitsCpu,
    LimitsMemory,
    RequestsCpu,
    RequestsMemory,
}

impl ResourceField {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LimitsCpu => "limits.cpu",
            Self::LimitsMemory => "limits.memory",
            Self::RequestsCpu => "requests.cpu",
            Self::RequestsMemory => "requests.memory",
        }
    }

    pub fn dimension(&self) -> Dimension {
        match self {
            Self::LimitsCpu | Self::RequestsCpu => Dimension::Cpu,
            Self::LimitsMemory | Self::RequestsMemory => Dimension::Memory,
        }
    }
}

/// A parsed resource quantity
///
/// Keeps the operator's original notation (handed to the cluster verbatim)
/// next to its exact amount in nano base units (nano-cores or nano-bytes),
/// so equal amounts in different notations compare equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Quantity {
    raw: String,
    nanos: i128,
}

/// Nano units per base unit, as a power of ten
const NANO_SCALE: i64 = 9;

impl Quantity {
    /// Parse a quantity for the given dimension
    pub fn parse(input: &str, dimension: Dimension) -> std::result::Result<Self, String> {
        let raw = input.trim();
        let caps = quantity_pattern()
            .captures(raw)
            .ok_or_else(|| "not a valid quantity".to_string())?;

        let number = &caps["num"];
        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        let digits = format!("{}{}", whole, fraction);
        let digits = digits.trim_start_matches('0');
        let mantissa: i128 = if digits.is_empty() {
            0
        } else {
            digits
                .parse()
                .map_err(|_| "quantity out of range".to_string())?
        };

        let mut exponent = NANO_SCALE - fraction.len() as i64;
        let mut factor: i128 = 1;
        match (caps.name("suffix"), caps.name("exp")) {
            (Some(suffix), _) => {
                let suffix = suffix.as_str();
                if dimension == Dimension::Memory && matches!(suffix, "n" | "u" | "m") {
                    return Err(format!("memory cannot use sub-byte suffix '{}'", suffix));
                }
                match suffix_scale(suffix) {
                    Scale::Decimal(power) => exponent += power,
                    Scale::Binary(power) => factor = 1024i128.pow(power),
                }
            }
            (None, Some(exp)) => {
                let exp: i64 = exp.as_str()[1..]
                    .parse()
                    .map_err(|_| "invalid exponent".to_string())?;
                exponent = exponent
                    .checked_add(exp)
                    .ok_or_else(|| "quantity out of range".to_string())?;
            }
            (None, None) => {}
        }

        let nanos = scale_nanos(mantissa, factor, exponent)
            .ok_or_else(|| "quantity out of range".to_string())?;

        Ok(Self {
            raw: raw.to_string(),
            nanos,
        })
    }

    /// Original notation
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Exact amount in nano base units
    pub fn nanos(&self) -> i128 {
        self.nanos
    }
}

/// `mantissa * factor * 10^exponent`, rounded up to a whole nano unit
fn scale_nanos(mantissa: i128, factor: i128, exponent: i64) -> Option<i128> {
    let value = mantissa.checked_mul(factor)?;
    if value == 0 {
        return Some(0);
    }
    if exponent >= 0 {
        let power = 10i128.checked_pow(u32::try_from(exponent).ok()?)?;
        return value.checked_mul(power);
    }
    match u32::try_from(-exponent).ok().and_then(|e| 10i128.checked_pow(e)) {
        Some(divisor) => Some(value / divisor + i128::from(value % divisor != 0)),
        // Smaller than any representable divisor: rounds up to one nano unit
        None => Some(1),
    }
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl TryFrom<String> for Quantity {
    type Error = String;

    // Serialized quantities carry no dimension; the decimal grammar is shared
    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Quantity::parse(&value, Dimension::Cpu)
    }
}

impl From<Quantity> for String {
    fn from(quantity: Quantity) -> Self {
        quantity.raw
    }
}

enum Scale {
    Decimal(i64),
    Binary(u32),
}

fn suffix_scale(suffix: &str) -> Scale {
    match suffix {
        "n" => Scale::Decimal(-9),
        "u" => Scale::Decimal(-6),
        "m" => Scale::Decimal(-3),
        "k" => Scale::Decimal(3),
        "M" => Scale::Decimal(6),
        "G" => Scale::Decimal(9),
        "T" => Scale::Decimal(12),
        "P" => Scale::Decimal(15),
        "E" => Scale::Decimal(18),
        "Ki" => Scale::Binary(1),
        "Mi" => Scale::Binary(2),
        "Gi" => Scale::Binary(3),
        "Ti" => Scale::Binary(4),
        "Pi" => Scale::Binary(5),
        "Ei" => Scale::Binary(6),
        _ => Scale::Decimal(0),
    }
}

/// CPU/memory limits and requests for a job's containers
///
/// `None` means "inherit": from the service defaults when merged, otherwise
/// from the cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceEnvelope {
    pub limits_cpu: Option<Quantity>,
    pub limits_memory: Option<Quantity>,
    pub requests_cpu: Option<Quantity>,
    pub requests_memory: Option<Quantity>,
}

/// Resolve four quantity strings into a validated envelope
///
/// Empty strings are unset. Fails with `InvalidQuantity` for unparsable
/// values or a request above its limit.
pub fn resolve(
    limits_cpu: &str,
    limits_memory: &str,
    requests_cpu: &str,
    requests_memory: &str,
) -> Result<ResourceEnvelope> {
    let envelope = ResourceEnvelope {
        limits_cpu: parse_field(ResourceField::LimitsCpu, limits_cpu)?,
        limits_memory: parse_field(ResourceField::LimitsMemory, limits_memory)?,
        requests_cpu: parse_field(ResourceField::RequestsCpu, requests_cpu)?,
        requests_memory: parse_field(ResourceField::RequestsMemory, requests_memory)?,
    };
    envelope.validate()?;
    Ok(envelope)
}

fn parse_field(field: ResourceField, input: &str) -> Result<Option<Quantity>> {
    if input.trim().is_empty() {
        return Ok(None);
    }

    Quantity::parse(input, field.dimension())
        .map(Some)
        .map_err(|reason| Error::invalid_quantity(field.name(), input, reason))
}

impl ResourceEnvelope {
    /// Whether no field is set
    pub fn is_empty(&self) -> bool {
        self.limits_cpu.is_none()
            && self.limits_memory.is_none()
            && self.requests_cpu.is_none()
            && self.requests_memory.is_none()
    }

    /// Check request <= limit for every dimension where both are set
    pub fn validate(&self) -> Result<()> {
        check_order(
            ResourceField::RequestsCpu,
            self.requests_cpu.as_ref(),
            self.limits_cpu.as_ref(),
        )?;
        check_order(
            ResourceField::RequestsMemory,
            self.requests_memory.as_ref(),
            self.limits_memory.as_ref(),
        )
    }

    /// Fill unset fields from `defaults`, then re-validate the result
    pub fn merge_over(&self, defaults: &ResourceEnvelope) -> Result<ResourceEnvelope> {
        let merged = ResourceEnvelope {
            limits_cpu: self.limits_cpu.clone().or_else(|| defaults.limits_cpu.clone()),
            limits_memory: self
                .limits_memory
                .clone()
                .or_else(|| defaults.limits_memory.clone()),
            requests_cpu: self
                .requests_cpu
                .clone()
                .or_else(|| defaults.requests_cpu.clone()),
            requests_memory: self
                .requests_memory
                .clone()
                .or_else(|| defaults.requests_memory.clone()),
        };
        merged.validate()?;
        Ok(merged)
    }
}

fn check_order(
    field: ResourceField,
    request: Option<&Quantity>,
    limit: Option<&Quantity>,
) -> Result<()> {
    match (request, limit) {
        (Some(request), Some(limit)) if request.nanos() > limit.nanos() => {
            Err(Error::invalid_quantity(
                field.name(),
                request.as_str(),
                format!("request exceeds limit {}", limit),
            ))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantities() {
        let cpu = Quantity::parse("500m", Dimension::Cpu).unwrap();
        assert_eq!(cpu.nanos(), 500_000_000);

        let mem = Quantity::parse("256Mi", Dimension::Memory).unwrap();
        assert_eq!(mem.nanos(), 256 * 1024 * 1024 * 1_000_000_000);

        let exp = Quantity::parse("1e3", Dimension::Memory).unwrap();
        assert_eq!(exp.nanos(), 1000 * 1_000_000_000);

        let tiny = Quantity::parse("1e-12", Dimension::Cpu).unwrap();
        assert_eq!(tiny.nanos(), 1);

        assert_eq!(Quantity::parse("2", Dimension::Cpu).unwrap().as_str(), "2");
        assert!(Quantity::parse("0.25", Dimension::Cpu).is_ok());
    }

    #[test]
    fn test_reject_invalid_quantities() {
        assert!(Quantity::parse("abc", Dimension::Cpu).is_err());
        assert!(Quantity::parse("-1", Dimension::Cpu).is_err());
        assert!(Quantity::parse("12XB", Dimension::Memory).is_err());
        assert!(Quantity::parse("100m", Dimension::Memory).is_err());
    }

    #[test]
    fn test_resolve_empty_inherits() {
        let envelope = resolve("", "", "", "").unwrap();
        assert!(envelope.is_empty());

        let envelope = resolve("1", "", "", "512Mi").unwrap();
        assert_eq!(envelope.limits_cpu.unwrap().as_str(), "1");
        assert!(envelope.limits_memory.is_none());
        assert!(envelope.requests_cpu.is_none());
        assert_eq!(envelope.requests_memory.unwrap().as_str(), "512Mi");
    }

    #[test]
    fn test_resolve_invalid_string() {
        let err = resolve("lots", "", "", "").unwrap_err();
        match err {
            Error::InvalidQuantity { field, value, .. } => {
                assert_eq!(field, "limits.cpu");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_request_above_limit_fails() {
        let err = resolve("1", "", "2", "").unwrap_err();
        assert!(matches!(err, Error::InvalidQuantity { ref field, .. } if field == "requests.cpu"));

        let err = resolve("", "1Gi", "", "2Gi").unwrap_err();
        assert!(matches!(err, Error::InvalidQuantity { ref field, .. } if field == "requests.memory"));
    }

    #[test]
    fn test_request_equal_limit_across_units() {
        assert!(resolve("1", "1Gi", "1000m", "1024Mi").is_ok());
        assert!(resolve("1G", "", "1000M", "").is_ok());
        assert!(resolve("0.5", "", "5e-1", "").is_ok());
    }

    #[test]
    fn test_milli_and_decimal_notation_are_equal() {
        for milli in 1..5000u32 {
            let decimal = format!("{}.{:03}", milli / 1000, milli % 1000);
            let milli = format!("{}m", milli);

            let a = Quantity::parse(&decimal, Dimension::Cpu).unwrap();
            let b = Quantity::parse(&milli, Dimension::Cpu).unwrap();
            assert_eq!(a.nanos(), b.nanos(), "{} vs {}", decimal, milli);

            assert!(resolve(&decimal, "", &milli, "").is_ok());
            assert!(resolve(&milli, "", &decimal, "").is_ok());
        }
        assert!(resolve("0.009", "", "9m", "").is_ok());
    }

    #[test]
    fn test_out_of_range_quantity() {
        assert!(Quantity::parse("1e400", Dimension::Cpu).is_err());
        assert!(Quantity::parse("99999999999999999999999999999999999999999", Dimension::Cpu).is_err());
    }

    #[test]
    fn test_merge_over_defaults() {
        let defaults = resolve("1", "512Mi", "100m", "128Mi").unwrap();
        let task = resolve("2", "", "", "").unwrap();

        let merged = task.merge_over(&defaults).unwrap();
        assert_eq!(merged.limits_cpu.unwrap().as_str(), "2");
        assert_eq!(merged.limits_memory.unwrap().as_str(), "512Mi");
        assert_eq!(merged.requests_cpu.unwrap().as_str(), "100m");
        assert_eq!(merged.requests_memory.unwrap().as_str(), "128Mi");
    }

    #[test]
    fn test_merge_revalidates() {
        let defaults = resolve("1", "", "", "").unwrap();
        let task = resolve("", "", "2", "").unwrap();

        assert!(task.merge_over(&defaults).is_err());
    }
}
