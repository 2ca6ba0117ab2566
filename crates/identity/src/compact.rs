//! Compact on-device certificate encoding.
//!
//! A secure element stores only the dynamic parts of a certificate in a
//! 72-byte record; everything else comes from the certificate definition.
//!
//! ```text
//! 0..32   signature r
//! 32..64  signature s
//! 64..67  encoded date
//! 67..69  signer id (big-endian)
//! 69      template id (high nibble) | chain id (low nibble)
//! 70      serial number source (high nibble)
//! 71      format version
//! ```

use std::fmt;

use p256::ecdsa::Signature;
use x509_cert::der::asn1::{GeneralizedTime, UtcTime};
use x509_cert::der::DateTime;
use x509_cert::time::{Time, Validity};

use crate::definition::SerialSource;
use crate::error::DecodeError;

/// 3-byte issue date and validity length.
///
/// Big-endian bit packing: year since 2000 (5 bits), month (4), day (5),
/// hour (5), expire years (5). Zero expire years means the certificate does
/// not expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedDate {
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    expire_years: u8,
}

impl EncodedDate {
    pub const SIZE: usize = 3;
    pub const BASE_YEAR: u16 = 2000;
    pub const MAX_YEAR_OFFSET: u16 = 31;
    pub const MAX_EXPIRE_YEARS: u8 = 31;

    const YEAR_SHIFT: u32 = 19;
    const MONTH_SHIFT: u32 = 15;
    const DAY_SHIFT: u32 = 10;
    const HOUR_SHIFT: u32 = 5;
    const FIVE_BITS: u32 = 0x1F;
    const FOUR_BITS: u32 = 0x0F;

    pub fn new(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        expire_years: u8,
    ) -> Result<Self, DecodeError> {
        let in_range = (Self::BASE_YEAR..=Self::BASE_YEAR + Self::MAX_YEAR_OFFSET).contains(&year)
            && (1..=12).contains(&month)
            && (1..=31).contains(&day)
            && hour <= 23
            && expire_years <= Self::MAX_EXPIRE_YEARS;
        if !in_range {
            return Err(DecodeError::InvalidDate);
        }

        let date = Self {
            year,
            month,
            day,
            hour,
            expire_years,
        };
        // Rejects calendar-impossible days, including a Feb 29 expiry.
        date.validity()?;
        Ok(date)
    }

    /// Encode an issue instant, truncated to the hour.
    pub fn from_date_time(issued: &DateTime, expire_years: u8) -> Result<Self, DecodeError> {
        Self::new(
            issued.year(),
            issued.month(),
            issued.day(),
            issued.hour(),
            expire_years,
        )
    }

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Result<Self, DecodeError> {
        let raw = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]);
        Self::new(
            Self::BASE_YEAR + ((raw >> Self::YEAR_SHIFT) & Self::FIVE_BITS) as u16,
            ((raw >> Self::MONTH_SHIFT) & Self::FOUR_BITS) as u8,
            ((raw >> Self::DAY_SHIFT) & Self::FIVE_BITS) as u8,
            ((raw >> Self::HOUR_SHIFT) & Self::FIVE_BITS) as u8,
            (raw & Self::FIVE_BITS) as u8,
        )
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let raw = (u32::from(self.year - Self::BASE_YEAR) << Self::YEAR_SHIFT)
            | (u32::from(self.month) << Self::MONTH_SHIFT)
            | (u32::from(self.day) << Self::DAY_SHIFT)
            | (u32::from(self.hour) << Self::HOUR_SHIFT)
            | u32::from(self.expire_years);
        let bytes = raw.to_be_bytes();
        [bytes[1], bytes[2], bytes[3]]
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    pub fn day(&self) -> u8 {
        self.day
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn expire_years(&self) -> u8 {
        self.expire_years
    }

    /// X.509 validity window described by this date.
    pub fn validity(&self) -> Result<Validity, DecodeError> {
        let issued = date_time(self.year, self.month, self.day, self.hour, 0, 0)?;
        let expires = if self.expire_years == 0 {
            date_time(9999, 12, 31, 23, 59, 59)?
        } else {
            date_time(
                self.year + u16::from(self.expire_years),
                self.month,
                self.day,
                self.hour,
                0,
                0,
            )?
        };

        Ok(Validity {
            not_before: to_time(issued)?,
            not_after: to_time(expires)?,
        })
    }
}

fn date_time(
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minutes: u8,
    seconds: u8,
) -> Result<DateTime, DecodeError> {
    DateTime::new(year, month, day, hour, minutes, seconds).map_err(|_| DecodeError::InvalidDate)
}

// RFC 5280: UTCTime through 2049, GeneralizedTime from 2050.
fn to_time(date: DateTime) -> Result<Time, DecodeError> {
    if date.year() >= 2050 {
        Ok(Time::GeneralTime(GeneralizedTime::from_date_time(date)))
    } else {
        UtcTime::from_date_time(date)
            .map(Time::UtcTime)
            .map_err(|_| DecodeError::InvalidDate)
    }
}

/// 72-byte compact certificate as stored in a secure element slot.
#[derive(Clone, PartialEq, Eq)]
pub struct CompactCertificate {
    data: [u8; Self::SIZE],
}

impl CompactCertificate {
    pub const SIZE: usize = 72;
    /// Only defined format version.
    pub const FORMAT_VERSION: u8 = 0;

    const SIGNATURE_OFFSET: usize = 0;
    const DATE_OFFSET: usize = 64;
    const SIGNER_ID_OFFSET: usize = 67;
    const TEMPLATE_CHAIN_OFFSET: usize = 69;
    const SERIAL_SOURCE_OFFSET: usize = 70;
    const FORMAT_OFFSET: usize = 71;

    pub fn new(
        signature: &Signature,
        date: EncodedDate,
        signer_id: u16,
        template_id: u8,
        chain_id: u8,
        serial_source: SerialSource,
    ) -> Self {
        let mut data = [0u8; Self::SIZE];
        data[Self::SIGNATURE_OFFSET..Self::DATE_OFFSET].copy_from_slice(&signature.to_bytes());
        data[Self::DATE_OFFSET..Self::SIGNER_ID_OFFSET].copy_from_slice(&date.to_bytes());
        data[Self::SIGNER_ID_OFFSET..Self::TEMPLATE_CHAIN_OFFSET]
            .copy_from_slice(&signer_id.to_be_bytes());
        data[Self::TEMPLATE_CHAIN_OFFSET] = (template_id << 4) | (chain_id & 0x0F);
        data[Self::SERIAL_SOURCE_OFFSET] = (serial_source as u8) << 4;
        data[Self::FORMAT_OFFSET] = Self::FORMAT_VERSION;
        Self { data }
    }

    pub fn signature(&self) -> Result<Signature, DecodeError> {
        Signature::from_slice(&self.data[Self::SIGNATURE_OFFSET..Self::DATE_OFFSET])
            .map_err(|_| DecodeError::Signature)
    }

    pub fn encoded_date(&self) -> Result<EncodedDate, DecodeError> {
        let mut bytes = [0u8; EncodedDate::SIZE];
        bytes.copy_from_slice(&self.data[Self::DATE_OFFSET..Self::SIGNER_ID_OFFSET]);
        EncodedDate::from_bytes(bytes)
    }

    pub fn signer_id(&self) -> u16 {
        u16::from_be_bytes([
            self.data[Self::SIGNER_ID_OFFSET],
            self.data[Self::SIGNER_ID_OFFSET + 1],
        ])
    }

    pub fn template_id(&self) -> u8 {
        self.data[Self::TEMPLATE_CHAIN_OFFSET] >> 4
    }

    pub fn chain_id(&self) -> u8 {
        self.data[Self::TEMPLATE_CHAIN_OFFSET] & 0x0F
    }

    pub fn serial_source(&self) -> u8 {
        self.data[Self::SERIAL_SOURCE_OFFSET] >> 4
    }

    pub fn format_version(&self) -> u8 {
        self.data[Self::FORMAT_OFFSET]
    }

    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        &self.data
    }
}

impl fmt::Debug for CompactCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompactCertificate({})", hex::encode(self.data))
    }
}

impl TryFrom<&[u8]> for CompactCertificate {
    type Error = DecodeError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let data: [u8; Self::SIZE] = bytes.try_into().map_err(|_| DecodeError::CompactSize {
            expected: Self::SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self { data })
    }
}
