//! Byne wire protocol: command bytes, version, and message types.

/// Current protocol version. Checked by the client on handshake.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest value carried in any payload.
pub const MAX_VALUE: u8 = 99;

/// Command byte leading every request and reply payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Hello = 0x00,
    GetEven = 0x01,
    GetOdd = 0x02,
    AcceptValue = 0x03,
}

impl Command {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Command::Hello),
            0x01 => Some(Command::GetEven),
            0x02 => Some(Command::GetOdd),
            0x03 => Some(Command::AcceptValue),
            _ => None,
        }
    }

    /// Minimum reply length for this command, command byte included.
    pub fn reply_len(self) -> usize {
        match self {
            Command::Hello => 3,
            Command::GetEven | Command::GetOdd => 2,
            Command::AcceptValue => 1,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Hello => "hello",
            Command::GetEven => "get_even",
            Command::GetOdd => "get_odd",
            Command::AcceptValue => "accept_value",
        };
        write!(f, "{} (0x{:02x})", name, self.as_byte())
    }
}

/// Parity class of a client: which kind of increment it asks the server for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    Odd,
    Even,
}

impl Parity {
    /// Request command used to refresh the increment amount.
    pub fn command(self) -> Command {
        match self {
            Parity::Odd => Command::GetOdd,
            Parity::Even => Command::GetEven,
        }
    }

    pub fn matches(self, value: u8) -> bool {
        match self {
            Parity::Odd => value % 2 == 1,
            Parity::Even => value % 2 == 0,
        }
    }
}

impl std::fmt::Display for Parity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Parity::Odd => f.write_str("odd"),
            Parity::Even => f.write_str("even"),
        }
    }
}

/// Client to server messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Hello,
    GetEven,
    GetOdd,
    AcceptValue(u8),
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::Hello => Command::Hello,
            Request::GetEven => Command::GetEven,
            Request::GetOdd => Command::GetOdd,
            Request::AcceptValue(_) => Command::AcceptValue,
        }
    }

    /// Increment refresh request for a parity class.
    pub fn refresh(parity: Parity) -> Self {
        match parity {
            Parity::Odd => Request::GetOdd,
            Parity::Even => Request::GetEven,
        }
    }
}

/// Server to client messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Handshake: protocol version and the last value known for this client.
    Hello { version: u8, value: u8 },
    GetEven(u8),
    GetOdd(u8),
    AcceptValue,
}

impl Reply {
    pub fn command(&self) -> Command {
        match self {
            Reply::Hello { .. } => Command::Hello,
            Reply::GetEven(_) => Command::GetEven,
            Reply::GetOdd(_) => Command::GetOdd,
            Reply::AcceptValue => Command::AcceptValue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_bytes_roundtrip() {
        for b in 0u8..=3 {
            let c = Command::from_byte(b).unwrap();
            assert_eq!(c.as_byte(), b);
        }
        assert_eq!(Command::from_byte(4), None);
        assert_eq!(Command::from_byte(0xff), None);
    }

    #[test]
    fn parity_selects_refresh_command() {
        assert_eq!(Parity::Odd.command(), Command::GetOdd);
        assert_eq!(Parity::Even.command(), Command::GetEven);
        assert_eq!(Request::refresh(Parity::Odd), Request::GetOdd);
        assert_eq!(Request::refresh(Parity::Even).command(), Command::GetEven);
    }

    #[test]
    fn parity_matches() {
        assert!(Parity::Odd.matches(1));
        assert!(Parity::Odd.matches(99));
        assert!(!Parity::Odd.matches(0));
        assert!(Parity::Even.matches(0));
        assert!(Parity::Even.matches(98));
        assert!(!Parity::Even.matches(57));
    }
}
