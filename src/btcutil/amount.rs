use std::cmp::Ordering;
use std::fmt::{self};

/// The number of satoshi in one bitcoin.
pub const SATOSHI_PER_BITCOIN: f64 = 1e8;

/// Various denominations when describing a bitcoin monetary amount.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Denomination {
    /// BTC * 10^6
    AmountMegaBtc,
    /// BTC * 10^3
    AmountKiloBtc,
    /// BTC
    AmountBtc,
    /// BTC * 10^-3
    AmountMilliBtc,
    /// BTC * 10^-6
    AmountMicroBtc,
    /// BTC * 10^-8
    AmountSatoshi,
}

impl Denomination {
    /// The number of decimal places.
    pub fn precision(self) -> i32 {
        match self {
            Denomination::AmountMegaBtc => 6,
            Denomination::AmountKiloBtc => 3,
            Denomination::AmountBtc => 0,
            Denomination::AmountMilliBtc => -3,
            Denomination::AmountMicroBtc => -6,
            Denomination::AmountSatoshi => -8,
        }
    }
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Denomination::AmountMegaBtc => "MBTC",
            Denomination::AmountKiloBtc => "kBTC",
            Denomination::AmountBtc => "BTC",
            Denomination::AmountMilliBtc => "mBTC",
            Denomination::AmountMicroBtc => "uBTC",
            Denomination::AmountSatoshi => "Satoshi",
        })
    }
}

/// Describes errors converting amounts.
#[derive(Debug, Clone, PartialEq)]
pub enum AmountError {
    /// The floating point value is not representable as an amount.
    InvalidBtcAmount,
}

impl fmt::Display for AmountError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            AmountError::InvalidBtcAmount => write!(f, "invalid bitcoin amount"),
        }
    }
}

/// Rounds a floating point number of satoshi to the nearest integer Amount,
/// half away from zero.  Nudging the value by half a satoshi toward its own
/// sign lets the integer truncation land on the nearest unit.
fn round(f: f64) -> Amount {
    Amount((f + 0.5f64.copysign(f)) as i64)
}

/// Creates an Amount from a floating point value representing a quantity of
/// bitcoin.  Non-finite values (NaN and the infinities) have no fixed-point
/// form and are rejected.  No supply-range check is made, as f may not refer
/// to an amount at a single moment in time.
pub fn new(amount: f64) -> Result<Amount, AmountError> {
    if !amount.is_finite() {
        return Err(AmountError::InvalidBtcAmount);
    }

    Ok(round(amount * SATOSHI_PER_BITCOIN))
}

/// Amount represents the base bitcoin monetary unit (colloquially referred
/// to as a `Satoshi').  A single Amount is equal to 1e-8 of a bitcoin.
#[derive(Debug, Clone, Copy)]
pub struct Amount(pub i64);

impl Amount {
    /// Converts a monetary amount counted in bitcoin base units to a
    /// floating point value representing an amount in the given denomination.
    pub fn to_unit(&self, denom: Denomination) -> f64 {
        self.0 as f64 / 10.0f64.powi(denom.precision() + 8)
    }

    /// Equivalent of calling to_unit with AmountBtc.
    pub fn to_btc(&self) -> f64 {
        self.to_unit(Denomination::AmountBtc)
    }

    /// Formats a monetary amount counted in bitcoin base units as a string
    /// for a given unit.  The conversion will succeed for any unit, however,
    /// known units will be formatted with an appended label describing the
    /// units with SI notation, or "Satoshi" for the base unit.
    pub fn format(&self, denomination: Denomination) -> String {
        format!("{} {}", self.to_unit(denomination), denomination)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.format(Denomination::AmountBtc))
    }
}

impl std::cmp::PartialOrd for Amount {
    fn partial_cmp(&self, other: &Amount) -> Option<Ordering> {
        Some(self.0.cmp(&other.0))
    }
}

impl std::cmp::PartialEq for Amount {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl std::cmp::Eq for Amount {}

impl std::cmp::Ord for Amount {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}
