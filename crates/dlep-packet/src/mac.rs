use nom::IResult;
use nom::bytes::complete::take;
use serde::Serialize;

use crate::parse_be::ParseBe;

/// Link-layer address identifying a DLEP destination.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DlepMac {
    octets: [u8; 6],
}

impl DlepMac {
    /// Sentinel used as the queue key for session-level (non-destination)
    /// request/response transactions.
    pub const SESSION: DlepMac = DlepMac { octets: [0u8; 6] };

    pub fn from_vec(vec: Vec<u8>) -> Option<Self> {
        if vec.len() != 6 {
            return None;
        }
        vec.try_into().ok().map(|octets| DlepMac { octets })
    }

    pub fn octets(&self) -> [u8; 6] {
        self.octets
    }

    pub fn is_session(&self) -> bool {
        *self == Self::SESSION
    }
}

impl From<[u8; 6]> for DlepMac {
    fn from(octets: [u8; 6]) -> Self {
        Self { octets }
    }
}

impl ParseBe<DlepMac> for DlepMac {
    fn parse_be(input: &[u8]) -> IResult<&[u8], DlepMac> {
        let (input, bytes) = take(6usize)(input)?;
        let mut octets = [0u8; 6];
        octets.copy_from_slice(bytes);
        Ok((input, DlepMac { octets }))
    }
}

impl std::fmt::Display for DlepMac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.octets[0],
            self.octets[1],
            self.octets[2],
            self.octets[3],
            self.octets[4],
            self.octets[5],
        )
    }
}

impl std::str::FromStr for DlepMac {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut count = 0;
        for part in s.split(':') {
            if count == 6 {
                return Err(format!("too many octets in MAC address: {}", s));
            }
            octets[count] = u8::from_str_radix(part, 16)
                .map_err(|_| format!("bad octet '{}' in MAC address: {}", part, s))?;
            count += 1;
        }
        if count != 6 {
            return Err(format!("MAC address must have 6 octets: {}", s));
        }
        Ok(DlepMac { octets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_display_roundtrip() {
        let mac: DlepMac = "aa:bb:cc:00:00:01".parse().unwrap();
        assert_eq!(mac.to_string(), "aa:bb:cc:00:00:01");
        assert_eq!(mac.octets(), [0xaa, 0xbb, 0xcc, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn mac_parse_errors() {
        assert!("aa:bb:cc".parse::<DlepMac>().is_err());
        assert!("aa:bb:cc:00:00:01:02".parse::<DlepMac>().is_err());
        assert!("zz:bb:cc:00:00:01".parse::<DlepMac>().is_err());
    }

    #[test]
    fn mac_parse_be() {
        let buf = [0xaa, 0xbb, 0xcc, 0x00, 0x00, 0x01, 0xff];
        let (rest, mac) = DlepMac::parse_be(&buf).unwrap();
        assert_eq!(rest, &[0xff]);
        assert_eq!(mac.to_string(), "aa:bb:cc:00:00:01");
        assert!(DlepMac::parse_be(&buf[..4]).is_err());
    }

    #[test]
    fn session_sentinel() {
        assert!(DlepMac::SESSION.is_session());
        let mac = DlepMac::from([0, 0, 0, 0, 0, 1]);
        assert!(!mac.is_session());
    }
}
