//! Comparison primitives shared by checks and mock parameter constraints.
//!
//! Every compared value is widened into one of six [`Domain`]s when it is
//! converted into a [`Value`]:
//! - signed integers widen to `i128`, unsigned integers to `u128`
//! - floats widen to `f64` and follow IEEE-754 (NaN is unequal to everything)
//! - strings compare byte-wise
//! - pointers compare by raw address
//! - memory blocks compare byte-wise over their explicit length
//!
//! Signed and unsigned integers compare exactly against each other, and
//! integers compared with floats are widened to `f64`. Any other cross-domain
//! comparison is a [`CompareError::DomainMismatch`].

use std::cmp::Ordering;
use std::ffi::{CStr, CString};
use std::fmt;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Domains and values
// ---------------------------------------------------------------------------

/// Value domain selected from the static type of a compared value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Signed,
    Unsigned,
    Float,
    Str,
    Ptr,
    Mem,
}

impl Domain {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Signed => "signed",
            Self::Unsigned => "unsigned",
            Self::Float => "float",
            Self::Str => "string",
            Self::Ptr => "pointer",
            Self::Mem => "memory",
        }
    }

    const fn is_numeric(self) -> bool {
        matches!(self, Self::Signed | Self::Unsigned | Self::Float)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A widened value tagged with its domain.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Signed(i128),
    Unsigned(u128),
    Float(f64),
    Str(Vec<u8>),
    Ptr(usize),
    Mem(Vec<u8>),
}

impl Value {
    #[must_use]
    pub const fn domain(&self) -> Domain {
        match self {
            Self::Signed(_) => Domain::Signed,
            Self::Unsigned(_) => Domain::Unsigned,
            Self::Float(_) => Domain::Float,
            Self::Str(_) => Domain::Str,
            Self::Ptr(_) => Domain::Ptr,
            Self::Mem(_) => Domain::Mem,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Signed(v) => Some(v as f64),
            Self::Unsigned(v) => Some(v as f64),
            Self::Float(v) => Some(v),
            _ => None,
        }
    }
}

/// Longest memory block prefix rendered in messages.
const MEM_RENDER_LIMIT: usize = 16;
/// Longest string prefix rendered in messages.
const STR_RENDER_LIMIT: usize = 256;

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signed(v) => write!(f, "{v}"),
            Self::Unsigned(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Str(bytes) => {
                let shown = &bytes[..bytes.len().min(STR_RENDER_LIMIT)];
                write!(f, "\"{}\"", shown.escape_ascii())?;
                if bytes.len() > STR_RENDER_LIMIT {
                    write!(f, "... <{} bytes>", bytes.len())?;
                }
                Ok(())
            }
            Self::Ptr(addr) => write!(f, "{addr:#x}"),
            Self::Mem(bytes) => {
                write!(f, "<{} bytes:", bytes.len())?;
                for byte in bytes.iter().take(MEM_RENDER_LIMIT) {
                    write!(f, " {byte:02x}")?;
                }
                if bytes.len() > MEM_RENDER_LIMIT {
                    f.write_str(" ...")?;
                }
                f.write_str(">")
            }
        }
    }
}

/// Explicitly sized memory block, compared byte-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mem<'a>(pub &'a [u8]);

impl<'a> From<&'a [u8]> for Mem<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self(bytes)
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Conversion of a statically typed value into its comparison domain.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

/// Conversion of a queued value back into a statically typed return value.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, CompareError>;
}

macro_rules! signed_value {
    ($($t:ty),*) => {$(
        impl IntoValue for $t {
            fn into_value(self) -> Value {
                Value::Signed(self as i128)
            }
        }

        impl FromValue for $t {
            fn from_value(value: Value) -> Result<Self, CompareError> {
                let converted = match value {
                    Value::Signed(v) => <$t>::try_from(v).ok(),
                    Value::Unsigned(v) => <$t>::try_from(v).ok(),
                    other => return Err(CompareError::conversion(&other, stringify!($t))),
                };
                converted.ok_or_else(|| CompareError::out_of_range(&value.to_string(), stringify!($t)))
            }
        }
    )*};
}

macro_rules! unsigned_value {
    ($($t:ty),*) => {$(
        impl IntoValue for $t {
            fn into_value(self) -> Value {
                Value::Unsigned(self as u128)
            }
        }

        impl FromValue for $t {
            fn from_value(value: Value) -> Result<Self, CompareError> {
                let converted = match value {
                    Value::Signed(v) => <$t>::try_from(v).ok(),
                    Value::Unsigned(v) => <$t>::try_from(v).ok(),
                    other => return Err(CompareError::conversion(&other, stringify!($t))),
                };
                converted.ok_or_else(|| CompareError::out_of_range(&value.to_string(), stringify!($t)))
            }
        }
    )*};
}

signed_value!(i8, i16, i32, i64, i128, isize);
unsigned_value!(u8, u16, u32, u64, u128, usize);

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Unsigned(u128::from(self))
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, CompareError> {
        match value {
            Value::Unsigned(0) | Value::Signed(0) => Ok(false),
            Value::Unsigned(1) | Value::Signed(1) => Ok(true),
            Value::Unsigned(_) | Value::Signed(_) => {
                Err(CompareError::out_of_range(&value.to_string(), "bool"))
            }
            other => Err(CompareError::conversion(&other, "bool")),
        }
    }
}

impl IntoValue for char {
    fn into_value(self) -> Value {
        Value::Unsigned(u128::from(u32::from(self)))
    }
}

impl IntoValue for f32 {
    fn into_value(self) -> Value {
        Value::Float(f64::from(self))
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, CompareError> {
        value
            .as_f64()
            .ok_or_else(|| CompareError::conversion(&value, "f64"))
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, CompareError> {
        value
            .as_f64()
            .map(|v| v as f32)
            .ok_or_else(|| CompareError::conversion(&value, "f32"))
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Str(self.as_bytes().to_vec())
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::Str(self.into_bytes())
    }
}

impl IntoValue for &String {
    fn into_value(self) -> Value {
        Value::Str(self.as_bytes().to_vec())
    }
}

impl IntoValue for &CStr {
    fn into_value(self) -> Value {
        Value::Str(self.to_bytes().to_vec())
    }
}

impl IntoValue for CString {
    fn into_value(self) -> Value {
        Value::Str(self.into_bytes())
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, CompareError> {
        match value {
            Value::Str(bytes) => {
                String::from_utf8(bytes).map_err(|_| CompareError::Conversion {
                    domain: Domain::Str,
                    target: "String",
                })
            }
            other => Err(CompareError::conversion(&other, "String")),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, CompareError> {
        match value {
            Value::Str(bytes) | Value::Mem(bytes) => Ok(bytes),
            other => Err(CompareError::conversion(&other, "Vec<u8>")),
        }
    }
}

impl<T> IntoValue for *const T {
    fn into_value(self) -> Value {
        Value::Ptr(self.expose_provenance())
    }
}

impl<T> IntoValue for *mut T {
    fn into_value(self) -> Value {
        Value::Ptr(self.expose_provenance())
    }
}

impl<T> FromValue for *const T {
    fn from_value(value: Value) -> Result<Self, CompareError> {
        match value {
            Value::Ptr(addr) => Ok(std::ptr::with_exposed_provenance(addr)),
            other => Err(CompareError::conversion(&other, "*const T")),
        }
    }
}

impl<T> FromValue for *mut T {
    fn from_value(value: Value) -> Result<Self, CompareError> {
        match value {
            Value::Ptr(addr) => Ok(std::ptr::with_exposed_provenance_mut(addr)),
            other => Err(CompareError::conversion(&other, "*mut T")),
        }
    }
}

impl IntoValue for Mem<'_> {
    fn into_value(self) -> Value {
        Value::Mem(self.0.to_vec())
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, CompareError> {
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Predicates and constraints
// ---------------------------------------------------------------------------

/// Comparison predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Predicate {
    Equal,
    Unequal,
    Greater,
    GreaterEqual,
    Lower,
    LowerEqual,
    InRange,
    NotInRange,
    InSet,
    NotInSet,
    Begin,
    NotBegin,
    End,
    NotEnd,
    Contain,
    NotContain,
}

impl Predicate {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "equal",
            Self::Unequal => "unequal",
            Self::Greater => "greater",
            Self::GreaterEqual => "greater_equal",
            Self::Lower => "lower",
            Self::LowerEqual => "lower_equal",
            Self::InRange => "in_range",
            Self::NotInRange => "not_in_range",
            Self::InSet => "in_set",
            Self::NotInSet => "not_in_set",
            Self::Begin => "begin",
            Self::NotBegin => "not_begin",
            Self::End => "end",
            Self::NotEnd => "not_end",
            Self::Contain => "contain",
            Self::NotContain => "not_contain",
        }
    }

    /// Whether this predicate is defined for values of `domain`.
    #[must_use]
    pub const fn supports(self, domain: Domain) -> bool {
        match self {
            Self::Equal | Self::Unequal => true,
            Self::Greater
            | Self::GreaterEqual
            | Self::Lower
            | Self::LowerEqual
            | Self::InRange
            | Self::NotInRange => domain.is_numeric() || matches!(domain, Domain::Ptr),
            Self::InSet | Self::NotInSet => !matches!(domain, Domain::Mem),
            Self::Begin
            | Self::NotBegin
            | Self::End
            | Self::NotEnd
            | Self::Contain
            | Self::NotContain => matches!(domain, Domain::Str),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected side of a constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Single(Value),
    Range { min: Value, max: Value },
    Set(Vec<Value>),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(value) => write!(f, "{value}"),
            Self::Range { min, max } => write!(f, "[{min}, {max}]"),
            Self::Set(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// A predicate bound to its expected operand.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    predicate: Predicate,
    operand: Operand,
    expr: Option<String>,
}

macro_rules! single_constructors {
    ($($name:ident => $pred:ident),* $(,)?) => {$(
        #[must_use]
        pub fn $name(expected: impl IntoValue) -> Self {
            Self::new(Predicate::$pred, Operand::Single(expected.into_value()))
        }
    )*};
}

impl Constraint {
    fn new(predicate: Predicate, operand: Operand) -> Self {
        Self {
            predicate,
            operand,
            expr: None,
        }
    }

    single_constructors! {
        equal => Equal,
        unequal => Unequal,
        greater => Greater,
        greater_equal => GreaterEqual,
        lower => Lower,
        lower_equal => LowerEqual,
        begin => Begin,
        not_begin => NotBegin,
        end => End,
        not_end => NotEnd,
        contain => Contain,
        not_contain => NotContain,
    }

    /// Inclusive range membership.
    #[must_use]
    pub fn in_range(min: impl IntoValue, max: impl IntoValue) -> Self {
        Self::new(
            Predicate::InRange,
            Operand::Range {
                min: min.into_value(),
                max: max.into_value(),
            },
        )
    }

    #[must_use]
    pub fn not_in_range(min: impl IntoValue, max: impl IntoValue) -> Self {
        Self::new(
            Predicate::NotInRange,
            Operand::Range {
                min: min.into_value(),
                max: max.into_value(),
            },
        )
    }

    /// Set membership; order and duplicates of `items` are irrelevant.
    #[must_use]
    pub fn in_set<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: IntoValue,
    {
        Self::new(
            Predicate::InSet,
            Operand::Set(items.into_iter().map(IntoValue::into_value).collect()),
        )
    }

    #[must_use]
    pub fn not_in_set<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: IntoValue,
    {
        Self::new(
            Predicate::NotInSet,
            Operand::Set(items.into_iter().map(IntoValue::into_value).collect()),
        )
    }

    /// Attach the source text of the expected operand, used in messages.
    #[must_use]
    pub fn with_expr(mut self, expr: impl Into<String>) -> Self {
        let expr = expr.into();
        self.expr = (!expr.is_empty()).then_some(expr);
        self
    }

    #[must_use]
    pub const fn predicate(&self) -> Predicate {
        self.predicate
    }

    #[must_use]
    pub const fn operand(&self) -> &Operand {
        &self.operand
    }

    #[must_use]
    pub fn expr(&self) -> Option<&str> {
        self.expr.as_deref()
    }

    /// Human-readable form, e.g. `in_range [1, 5]`.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{} {}", self.predicate, self.operand)
    }

    /// Evaluate the constraint against `actual`.
    pub fn evaluate(&self, actual: &Value) -> Result<bool, CompareError> {
        let domain = actual.domain();
        if !self.predicate.supports(domain) {
            return Err(CompareError::Unsupported {
                predicate: self.predicate,
                domain,
            });
        }

        match &self.operand {
            Operand::Single(expected) => evaluate_single(self.predicate, actual, expected),
            Operand::Range { min, max } => {
                if order(min, max)? == Some(Ordering::Greater) {
                    return Err(CompareError::InvertedRange {
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                }
                let above_min = matches!(
                    order(actual, min)?,
                    Some(Ordering::Greater | Ordering::Equal)
                );
                let below_max = matches!(
                    order(actual, max)?,
                    Some(Ordering::Less | Ordering::Equal)
                );
                let inside = above_min && below_max;
                Ok(if self.predicate == Predicate::InRange {
                    inside
                } else {
                    !inside
                })
            }
            Operand::Set(items) => {
                let mut found = false;
                for item in items {
                    if order(actual, item)? == Some(Ordering::Equal) {
                        found = true;
                        break;
                    }
                }
                Ok(if self.predicate == Predicate::InSet {
                    found
                } else {
                    !found
                })
            }
        }
    }
}

fn evaluate_single(
    predicate: Predicate,
    actual: &Value,
    expected: &Value,
) -> Result<bool, CompareError> {
    use Predicate::*;

    if let (Value::Str(hay), Value::Str(needle)) = (actual, expected) {
        match predicate {
            Begin => return Ok(hay.starts_with(needle)),
            NotBegin => return Ok(!hay.starts_with(needle)),
            End => return Ok(hay.ends_with(needle)),
            NotEnd => return Ok(!hay.ends_with(needle)),
            Contain => return Ok(contains(hay, needle)),
            NotContain => return Ok(!contains(hay, needle)),
            _ => {}
        }
    }

    let ordering = order(actual, expected)?;
    Ok(match predicate {
        Equal => ordering == Some(Ordering::Equal),
        Unequal => ordering != Some(Ordering::Equal),
        Greater => ordering == Some(Ordering::Greater),
        GreaterEqual => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        Lower => ordering == Some(Ordering::Less),
        LowerEqual => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        // String predicates against a non-string operand land here.
        _ => {
            return Err(CompareError::DomainMismatch {
                actual: actual.domain(),
                expected: expected.domain(),
            });
        }
    })
}

fn contains(hay: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || hay.windows(needle.len()).any(|w| w == needle)
}

fn cmp_signed_unsigned(signed: i128, unsigned: u128) -> Ordering {
    if signed < 0 {
        Ordering::Less
    } else {
        (signed as u128).cmp(&unsigned)
    }
}

/// Total order within a domain; `None` only for unordered floats (NaN).
fn order(a: &Value, b: &Value) -> Result<Option<Ordering>, CompareError> {
    let ordering = match (a, b) {
        (Value::Signed(x), Value::Signed(y)) => Some(x.cmp(y)),
        (Value::Unsigned(x), Value::Unsigned(y)) => Some(x.cmp(y)),
        (Value::Signed(x), Value::Unsigned(y)) => Some(cmp_signed_unsigned(*x, *y)),
        (Value::Unsigned(x), Value::Signed(y)) => Some(cmp_signed_unsigned(*y, *x).reverse()),
        (Value::Float(_), _) | (_, Value::Float(_))
            if a.domain().is_numeric() && b.domain().is_numeric() =>
        {
            match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            }
        }
        (Value::Str(x), Value::Str(y)) | (Value::Mem(x), Value::Mem(y)) => {
            Some(x.as_slice().cmp(y.as_slice()))
        }
        (Value::Ptr(x), Value::Ptr(y)) => Some(x.cmp(y)),
        _ => {
            return Err(CompareError::DomainMismatch {
                actual: a.domain(),
                expected: b.domain(),
            });
        }
    };
    Ok(ordering)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// An invalid comparison. This is a usage error in the test, not a failed check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompareError {
    #[error("cannot compare a {actual} value against a {expected} operand")]
    DomainMismatch { actual: Domain, expected: Domain },
    #[error("predicate `{predicate}` is not defined for {domain} values")]
    Unsupported { predicate: Predicate, domain: Domain },
    #[error("range lower bound {min} exceeds upper bound {max}")]
    InvertedRange { min: String, max: String },
    #[error("value {value} does not fit in `{target}`")]
    OutOfRange { value: String, target: &'static str },
    #[error("{domain} value cannot convert to `{target}`")]
    Conversion { domain: Domain, target: &'static str },
}

impl CompareError {
    fn conversion(value: &Value, target: &'static str) -> Self {
        Self::Conversion {
            domain: value.domain(),
            target,
        }
    }

    fn out_of_range(value: &str, target: &'static str) -> Self {
        Self::OutOfRange {
            value: value.to_string(),
            target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic xorshift64 generator.
    struct XorShift64(u64);

    impl XorShift64 {
        fn next(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            x
        }

        fn shuffle<T>(&mut self, items: &mut [T]) {
            for i in (1..items.len()).rev() {
                let j = (self.next() % (i as u64 + 1)) as usize;
                items.swap(i, j);
            }
        }
    }

    fn samples() -> Vec<Value> {
        let block = [1u8, 2, 3, 4];
        vec![
            (-42i64).into_value(),
            7u8.into_value(),
            2.5f64.into_value(),
            "hello".into_value(),
            (&block as *const [u8; 4]).into_value(),
            Mem(&block).into_value(),
        ]
    }

    #[test]
    fn equal_is_reflexive_in_every_domain() {
        for value in samples() {
            let c = Constraint::equal(value.clone());
            assert_eq!(c.evaluate(&value), Ok(true), "{value}");
            assert_eq!(Constraint::unequal(value.clone()).evaluate(&value), Ok(false));
        }
    }

    #[test]
    fn degenerate_range_contains_its_bound() {
        for value in samples() {
            if !Predicate::InRange.supports(value.domain()) {
                continue;
            }
            let c = Constraint::in_range(value.clone(), value.clone());
            assert_eq!(c.evaluate(&value), Ok(true), "{value}");
        }
    }

    #[test]
    fn set_membership_ignores_order_and_duplicates() {
        let seeds = [0x9E37_79B9_7F4A_7C15u64, 0xDEAD_BEEF, 1, 12345];
        let base: Vec<i64> = vec![3, -1, 8, 8, 21, 0, -55];
        for seed in seeds {
            let mut rng = XorShift64(seed);
            for candidate in -60i64..30 {
                let expected = Constraint::in_set(base.clone()).evaluate(&candidate.into_value());
                let mut shuffled = base.clone();
                rng.shuffle(&mut shuffled);
                let got = Constraint::in_set(shuffled.clone()).evaluate(&candidate.into_value());
                assert_eq!(got, expected, "seed {seed} candidate {candidate}");
                let negated = Constraint::not_in_set(shuffled).evaluate(&candidate.into_value());
                assert_eq!(negated.map(|b| !b), expected);
            }
        }
    }

    #[test]
    fn signed_and_unsigned_compare_by_value() {
        let c = Constraint::equal(3);
        assert_eq!(c.evaluate(&3u8.into_value()), Ok(true));
        assert_eq!(Constraint::lower(0u32).evaluate(&(-1i32).into_value()), Ok(true));
        assert_eq!(
            Constraint::greater(-1i64).evaluate(&u128::MAX.into_value()),
            Ok(true)
        );
        assert_eq!(Constraint::equal(-1i8).evaluate(&u64::MAX.into_value()), Ok(false));
    }

    #[test]
    fn integer_against_float_widens() {
        assert_eq!(Constraint::equal(2).evaluate(&2.0f64.into_value()), Ok(true));
        assert_eq!(Constraint::lower(2.5).evaluate(&2i32.into_value()), Ok(true));
    }

    #[test]
    fn nan_is_unequal_to_everything() {
        let nan = f64::NAN.into_value();
        assert_eq!(Constraint::equal(f64::NAN).evaluate(&nan), Ok(false));
        assert_eq!(Constraint::unequal(f64::NAN).evaluate(&nan), Ok(true));
        assert_eq!(Constraint::greater(0.0).evaluate(&nan), Ok(false));
        assert_eq!(Constraint::in_range(0.0, 1.0).evaluate(&nan), Ok(false));
    }

    #[test]
    fn ranges_are_inclusive() {
        let c = Constraint::in_range(1, 5);
        assert_eq!(c.evaluate(&1.into_value()), Ok(true));
        assert_eq!(c.evaluate(&5.into_value()), Ok(true));
        assert_eq!(c.evaluate(&6.into_value()), Ok(false));
        assert_eq!(Constraint::not_in_range(1, 5).evaluate(&0.into_value()), Ok(true));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = Constraint::in_range(5, 1).evaluate(&3.into_value()).unwrap_err();
        assert!(matches!(err, CompareError::InvertedRange { .. }));
    }

    #[test]
    fn string_predicates() {
        let s = "hello world".into_value();
        assert_eq!(Constraint::begin("hello").evaluate(&s), Ok(true));
        assert_eq!(Constraint::not_begin("world").evaluate(&s), Ok(true));
        assert_eq!(Constraint::end("world").evaluate(&s), Ok(true));
        assert_eq!(Constraint::not_end("hello").evaluate(&s), Ok(true));
        assert_eq!(Constraint::contain("o w").evaluate(&s), Ok(true));
        assert_eq!(Constraint::not_contain("xyz").evaluate(&s), Ok(true));
        assert_eq!(Constraint::contain("").evaluate(&s), Ok(true));
        assert_eq!(Constraint::in_set(["a", "hello world"]).evaluate(&s), Ok(true));
        assert_eq!(Constraint::lower("zzz").evaluate(&s).unwrap_err(), CompareError::Unsupported {
            predicate: Predicate::Lower,
            domain: Domain::Str,
        });
    }

    #[test]
    fn memory_compares_over_explicit_length() {
        let a = [0u8, 1, 2, 3];
        let b = [0u8, 1, 2, 4];
        let actual = Mem(&a[..3]).into_value();
        assert_eq!(Constraint::equal(Mem(&b[..3])).evaluate(&actual), Ok(true));
        assert_eq!(Constraint::equal(Mem(&b)).evaluate(&Mem(&a).into_value()), Ok(false));
        assert!(Constraint::in_set([Mem(&a)]).evaluate(&actual).is_err());
    }

    #[test]
    fn pointers_order_by_address() {
        let buf = [0u32; 4];
        let lo = buf.as_ptr();
        let hi = buf[3..].as_ptr();
        assert_eq!(Constraint::lower(hi).evaluate(&lo.into_value()), Ok(true));
        assert_eq!(
            Constraint::in_range(lo, hi).evaluate(&buf[1..].as_ptr().into_value()),
            Ok(true)
        );
    }

    #[test]
    fn cross_domain_comparison_is_an_error() {
        let err = Constraint::equal("3").evaluate(&3.into_value()).unwrap_err();
        assert_eq!(err, CompareError::DomainMismatch {
            actual: Domain::Signed,
            expected: Domain::Str,
        });
    }

    #[test]
    fn return_value_conversions() {
        assert_eq!(u8::from_value(Value::Signed(200)), Ok(200));
        assert!(matches!(
            u8::from_value(Value::Signed(-1)),
            Err(CompareError::OutOfRange { .. })
        ));
        assert_eq!(i64::from_value(Value::Unsigned(5)), Ok(5));
        assert_eq!(bool::from_value(Value::Unsigned(1)), Ok(true));
        assert_eq!(String::from_value("x".into_value()), Ok("x".to_string()));
        assert!(matches!(
            String::from_value(Value::Signed(1)),
            Err(CompareError::Conversion { .. })
        ));
        let p: *const u8 = <*const u8>::from_value(Value::Ptr(0x1000)).unwrap();
        assert_eq!(p.addr(), 0x1000);
    }

    #[test]
    fn describe_renders_operands() {
        assert_eq!(Constraint::in_range(1, 5).describe(), "in_range [1, 5]");
        assert_eq!(Constraint::in_set([1, 2]).describe(), "in_set {1, 2}");
        assert_eq!(Constraint::equal("a\n").describe(), "equal \"a\\n\"");
        assert_eq!(
            Mem(&[0xab, 0x01]).into_value().to_string(),
            "<2 bytes: ab 01>"
        );
    }

    #[test]
    fn long_strings_render_a_prefix() {
        let text = "a".repeat(1_100_000).into_value().to_string();
        assert!(text.len() < 400, "rendered {} bytes", text.len());
        assert!(text.starts_with("\"aaaa"));
        assert!(text.ends_with("\"... <1100000 bytes>"));
        assert_eq!("short".into_value().to_string(), "\"short\"");
    }
}
