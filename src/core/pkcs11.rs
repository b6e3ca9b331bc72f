//! PKCS#11 value types shared by the iterator, URI filter and printers
//!
//! Token text fields keep their on-wire shape: fixed-size byte arrays padded
//! with spaces. Callers trim before display or comparison.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Slot identifier within a module
pub type SlotId = u64;

/// A PKCS#11 return value (`CK_RV`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rv(pub u64);

impl Rv {
    pub const OK: Rv = Rv(0x0000_0000);
    pub const CANCEL: Rv = Rv(0x0000_0001);
    pub const HOST_MEMORY: Rv = Rv(0x0000_0002);
    pub const SLOT_ID_INVALID: Rv = Rv(0x0000_0003);
    pub const GENERAL_ERROR: Rv = Rv(0x0000_0005);
    pub const FUNCTION_FAILED: Rv = Rv(0x0000_0006);
    pub const DEVICE_ERROR: Rv = Rv(0x0000_0030);
    pub const DEVICE_REMOVED: Rv = Rv(0x0000_0032);
    pub const TOKEN_NOT_PRESENT: Rv = Rv(0x0000_00E0);
    pub const CRYPTOKI_NOT_INITIALIZED: Rv = Rv(0x0000_0190);

    /// Symbolic name of a well-known return value
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Rv::OK => "CKR_OK",
            Rv::CANCEL => "CKR_CANCEL",
            Rv::HOST_MEMORY => "CKR_HOST_MEMORY",
            Rv::SLOT_ID_INVALID => "CKR_SLOT_ID_INVALID",
            Rv::GENERAL_ERROR => "CKR_GENERAL_ERROR",
            Rv::FUNCTION_FAILED => "CKR_FUNCTION_FAILED",
            Rv::DEVICE_ERROR => "CKR_DEVICE_ERROR",
            Rv::DEVICE_REMOVED => "CKR_DEVICE_REMOVED",
            Rv::TOKEN_NOT_PRESENT => "CKR_TOKEN_NOT_PRESENT",
            Rv::CRYPTOKI_NOT_INITIALIZED => "CKR_CRYPTOKI_NOT_INITIALIZED",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for Rv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:08x}", self.0),
        }
    }
}

/// Hardware or firmware version (`CK_VERSION`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s.split_once('.').unwrap_or((s, "0"));
        let parse = |part: &str| {
            part.trim()
                .parse::<u8>()
                .map_err(|_| format!("invalid version: {}", s))
        };
        Ok(Version {
            major: parse(major)?,
            minor: parse(minor)?,
        })
    }
}

/// Token flags (`CKF_*` bits of `CK_TOKEN_INFO.flags`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenFlags(pub u64);

impl TokenFlags {
    pub const RNG: TokenFlags = TokenFlags(0x0000_0001);
    pub const WRITE_PROTECTED: TokenFlags = TokenFlags(0x0000_0002);
    pub const LOGIN_REQUIRED: TokenFlags = TokenFlags(0x0000_0004);
    pub const USER_PIN_INITIALIZED: TokenFlags = TokenFlags(0x0000_0008);
    pub const RESTORE_KEY_NOT_NEEDED: TokenFlags = TokenFlags(0x0000_0020);
    pub const CLOCK_ON_TOKEN: TokenFlags = TokenFlags(0x0000_0040);
    pub const PROTECTED_AUTHENTICATION_PATH: TokenFlags = TokenFlags(0x0000_0100);
    pub const DUAL_CRYPTO_OPERATIONS: TokenFlags = TokenFlags(0x0000_0200);
    pub const TOKEN_INITIALIZED: TokenFlags = TokenFlags(0x0000_0400);
    pub const SECONDARY_AUTHENTICATION: TokenFlags = TokenFlags(0x0000_0800);
    pub const USER_PIN_LOCKED: TokenFlags = TokenFlags(0x0004_0000);
    pub const SO_PIN_LOCKED: TokenFlags = TokenFlags(0x0040_0000);

    const NAMES: &'static [(TokenFlags, &'static str)] = &[
        (TokenFlags::RNG, "rng"),
        (TokenFlags::WRITE_PROTECTED, "write-protected"),
        (TokenFlags::LOGIN_REQUIRED, "login-required"),
        (TokenFlags::USER_PIN_INITIALIZED, "user-pin-initialized"),
        (TokenFlags::RESTORE_KEY_NOT_NEEDED, "restore-key-not-needed"),
        (TokenFlags::CLOCK_ON_TOKEN, "clock-on-token"),
        (TokenFlags::PROTECTED_AUTHENTICATION_PATH, "protected-authentication-path"),
        (TokenFlags::DUAL_CRYPTO_OPERATIONS, "dual-crypto-operations"),
        (TokenFlags::TOKEN_INITIALIZED, "token-initialized"),
        (TokenFlags::SECONDARY_AUTHENTICATION, "secondary-authentication"),
        (TokenFlags::USER_PIN_LOCKED, "user-pin-locked"),
        (TokenFlags::SO_PIN_LOCKED, "so-pin-locked"),
    ];

    pub fn empty() -> Self {
        TokenFlags(0)
    }

    pub fn contains(self, other: TokenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: TokenFlags) {
        self.0 |= other.0;
    }

    /// Look up a flag by its printed name
    pub fn from_name(name: &str) -> Option<TokenFlags> {
        Self::NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(flag, _)| *flag)
    }

    /// Printed names of the set flags, in bit order
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES
            .iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
    }
}

/// Token descriptor (`CK_TOKEN_INFO`), limited to what listing needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub label: [u8; 32],
    pub manufacturer_id: [u8; 32],
    pub model: [u8; 16],
    pub serial_number: [u8; 16],
    pub flags: TokenFlags,
    pub hardware_version: Version,
    pub firmware_version: Version,
}

impl TokenInfo {
    /// Build a descriptor from plain strings, padding each field with spaces
    pub fn new(label: &str, manufacturer: &str, model: &str, serial: &str) -> Self {
        Self {
            label: space_pad(label),
            manufacturer_id: space_pad(manufacturer),
            model: space_pad(model),
            serial_number: space_pad(serial),
            flags: TokenFlags::empty(),
            hardware_version: Version::default(),
            firmware_version: Version::default(),
        }
    }

    pub fn with_flags(mut self, flags: TokenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Label with the padding removed
    pub fn label(&self) -> Cow<'_, str> {
        space_trimmed(&self.label)
    }

    pub fn manufacturer(&self) -> Cow<'_, str> {
        space_trimmed(&self.manufacturer_id)
    }

    pub fn model(&self) -> Cow<'_, str> {
        space_trimmed(&self.model)
    }

    pub fn serial(&self) -> Cow<'_, str> {
        space_trimmed(&self.serial_number)
    }
}

/// Copy `value` into a fixed field, padding with spaces
///
/// Values longer than the field are cut at the last character boundary
/// that fits.
pub fn space_pad<const N: usize>(value: &str) -> [u8; N] {
    let mut field = [b' '; N];
    let mut end = value.len().min(N);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    field[..end].copy_from_slice(&value.as_bytes()[..end]);
    field
}

/// Strip trailing space padding from a fixed field
pub fn unpadded(field: &[u8]) -> &[u8] {
    let len = field
        .iter()
        .rposition(|&b| b != b' ')
        .map_or(0, |pos| pos + 1);
    &field[..len]
}

/// Trimmed field as display text, replacing invalid UTF-8
pub fn space_trimmed(field: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(unpadded(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_label_is_trimmed() {
        let info = TokenInfo::new("Test Token    ", "Example", "Soft", "0001");
        assert_eq!(info.label(), "Test Token");
        assert_eq!(&info.label[..10], b"Test Token");
        assert!(info.label[10..].iter().all(|&b| b == b' '));
    }

    #[test]
    fn test_space_pad_truncates_on_char_boundary() {
        let field: [u8; 4] = space_pad("abcé");
        assert_eq!(&field, b"abc ");
        let field: [u8; 4] = space_pad("abcdef");
        assert_eq!(&field, b"abcd");
    }

    #[test]
    fn test_unpadded_all_spaces() {
        assert!(unpadded(b"    ").is_empty());
        assert_eq!(unpadded(b"a b "), b"a b");
    }

    #[test]
    fn test_flag_names() {
        let mut flags = TokenFlags::RNG;
        flags.insert(TokenFlags::TOKEN_INITIALIZED);
        let names: Vec<_> = flags.names().collect();
        assert_eq!(names, vec!["rng", "token-initialized"]);
        assert_eq!(TokenFlags::from_name("login-required"), Some(TokenFlags::LOGIN_REQUIRED));
        assert_eq!(TokenFlags::from_name("bogus"), None);
    }

    #[test]
    fn test_rv_display() {
        assert_eq!(Rv::DEVICE_ERROR.to_string(), "CKR_DEVICE_ERROR");
        assert_eq!(Rv(0x8000_0001).to_string(), "0x80000001");
    }

    #[test]
    fn test_version_parse() {
        assert_eq!("2.40".parse::<Version>().unwrap(), Version { major: 2, minor: 40 });
        assert_eq!("3".parse::<Version>().unwrap(), Version { major: 3, minor: 0 });
        assert!("x.1".parse::<Version>().is_err());
        assert_eq!(Version { major: 1, minor: 2 }.to_string(), "1.2");
    }
}
