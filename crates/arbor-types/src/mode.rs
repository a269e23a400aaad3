//! Structured Unix permission mode.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::access::{AccessMode, PermissionClass};

/// Error parsing an octal mode string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeParseError {
    #[error("empty mode string")]
    Empty,
    #[error("invalid octal mode: {0}")]
    NotOctal(String),
    #[error("mode out of range: {0:o}")]
    OutOfRange(u32),
}

/// Permission bits plus the setuid, setgid and sticky bits.
///
/// Only the low twelve bits are meaningful; constructors mask everything
/// else away.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mode(u16);

impl Mode {
    pub const SETUID: u16 = 0o4000;
    pub const SETGID: u16 = 0o2000;
    pub const STICKY: u16 = 0o1000;

    /// The nine rwx bits.
    pub const PERMISSION_MASK: u16 = 0o777;
    /// The three special bits.
    pub const SPECIAL_MASK: u16 = 0o7000;
    pub const ALL: u16 = 0o7777;

    /// Default mode for a new directory before the umask.
    pub const DIRECTORY_DEFAULT: Mode = Mode(0o755);
    /// Default mode for a new file before the umask.
    pub const FILE_DEFAULT: Mode = Mode(0o666);
    /// Symbolic links carry full permissions; access goes through the target.
    pub const SYMLINK: Mode = Mode(0o777);

    /// Create a mode from raw bits, discarding anything above `0o7777`.
    pub const fn new(bits: u16) -> Self {
        Self(bits & Self::ALL)
    }

    /// Parse an octal string such as `"755"`, `"0644"` or `"1777"`.
    pub fn from_octal(s: &str) -> Result<Self, ModeParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ModeParseError::Empty);
        }
        let digits = s.strip_prefix("0o").unwrap_or(s);
        let value =
            u32::from_str_radix(digits, 8).map_err(|_| ModeParseError::NotOctal(s.to_string()))?;
        if value > u32::from(Self::ALL) {
            return Err(ModeParseError::OutOfRange(value));
        }
        Ok(Self(value as u16))
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    /// The nine rwx bits without special bits.
    pub const fn permission_bits(self) -> u16 {
        self.0 & Self::PERMISSION_MASK
    }

    pub const fn contains(self, bits: u16) -> bool {
        self.0 & bits == bits
    }

    pub const fn with(self, bits: u16) -> Self {
        Self::new(self.0 | bits)
    }

    pub const fn without(self, bits: u16) -> Self {
        Self(self.0 & !bits)
    }

    pub const fn is_setuid(self) -> bool {
        self.contains(Self::SETUID)
    }

    pub const fn is_setgid(self) -> bool {
        self.contains(Self::SETGID)
    }

    pub const fn is_sticky(self) -> bool {
        self.contains(Self::STICKY)
    }

    /// Apply a umask. Only the rwx bits of the mask take effect.
    pub const fn masked_by(self, umask: Mode) -> Self {
        Self(self.0 & !(umask.0 & Self::PERMISSION_MASK))
    }

    /// The `rwx` triple for one class, in the low three bits.
    pub const fn class_bits(self, class: PermissionClass) -> u16 {
        (self.0 >> class.shift()) & 0o7
    }

    /// Does `class` hold `access` under this mode?
    pub fn allows(self, class: PermissionClass, access: AccessMode) -> bool {
        self.class_bits(class) & access.bit() != 0
    }

    /// `ls -l` style rendering, e.g. `rwxr-sr-t`.
    pub fn symbolic(self) -> String {
        let mut out = String::with_capacity(9);
        for (class, special, special_char) in [
            (PermissionClass::Owner, Self::SETUID, 's'),
            (PermissionClass::Group, Self::SETGID, 's'),
            (PermissionClass::Other, Self::STICKY, 't'),
        ] {
            let triple = self.class_bits(class);
            out.push(if triple & 0o4 != 0 { 'r' } else { '-' });
            out.push(if triple & 0o2 != 0 { 'w' } else { '-' });
            let exec = triple & 0o1 != 0;
            out.push(match (self.contains(special), exec) {
                (true, true) => special_char,
                (true, false) => special_char.to_ascii_uppercase(),
                (false, true) => 'x',
                (false, false) => '-',
            });
        }
        out
    }
}

impl std::fmt::Debug for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Mode({:04o})", self.0)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.symbolic())
    }
}

impl std::fmt::Octal for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Octal::fmt(&self.0, f)
    }
}

impl From<u16> for Mode {
    fn from(bits: u16) -> Self {
        Self::new(bits)
    }
}

impl std::str::FromStr for Mode {
    type Err = ModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_octal(s)
    }
}
