use serde::de::{Error as DeError, Unexpected};
use serde::{Deserialize, Deserializer, Serializer};

fn parse_hex_u64<E: DeError>(s: &str) -> Result<u64, E> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|_| E::invalid_value(Unexpected::Str(s), &"0x.. hex u64"))
}

fn decode_hex<E: DeError>(s: &str) -> Result<Vec<u8>, E> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(E::custom)
}

/// 0x-hex <-> u64 (accepts hex string or JSON number)
pub mod u64_hex {
    use super::*;

    pub fn serialize<S>(val: &u64, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&format!("0x{:x}", val))
    }

    pub fn deserialize<'de, D>(d: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Num {
            Str(String),
            Num(u64),
        }
        match Num::deserialize(d)? {
            Num::Num(n) => Ok(n),
            Num::Str(s) => parse_hex_u64(&s),
        }
    }

    pub mod opt {
        use super::*;

        pub fn serialize<S>(val: &Option<u64>, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match val {
                Some(val) => super::serialize(val, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(d: D) -> Result<Option<u64>, D::Error>
        where
            D: Deserializer<'de>,
        {
            #[derive(Deserialize)]
            struct Wrapper(#[serde(with = "super")] u64);
            Ok(Option::<Wrapper>::deserialize(d)?.map(|Wrapper(v)| v))
        }
    }
}

/// 0x-hex <-> U256 as a minimal quantity (string or number)
pub mod u256_hex {
    use super::*;
    use alloy::primitives::U256;

    pub fn serialize<S>(val: &U256, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&format!("{:#x}", val))
    }

    pub fn deserialize<'de, D>(d: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Num {
            Str(String),
            Num(u64),
        }
        match Num::deserialize(d)? {
            Num::Num(n) => Ok(U256::from(n)),
            Num::Str(s) => {
                let digits = s.strip_prefix("0x").unwrap_or(&s);
                U256::from_str_radix(digits, 16).map_err(D::Error::custom)
            }
        }
    }

    pub mod opt {
        use super::*;

        pub fn serialize<S>(val: &Option<U256>, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match val {
                Some(val) => super::serialize(val, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(d: D) -> Result<Option<U256>, D::Error>
        where
            D: Deserializer<'de>,
        {
            #[derive(Deserialize)]
            struct Wrapper(#[serde(with = "super")] U256);
            Ok(Option::<Wrapper>::deserialize(d)?.map(|Wrapper(v)| v))
        }
    }
}

/// 0x-hex <-> Address
pub mod address_hex {
    use super::*;
    use alloy::primitives::Address;

    pub fn serialize<S>(val: &Address, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&format!("0x{}", hex::encode(val.as_slice())))
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Address, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(d)?;
        let bytes = decode_hex::<D::Error>(&s)?;
        if bytes.len() != 20 {
            return Err(D::Error::invalid_length(bytes.len(), &"20-byte address"));
        }
        Ok(Address::from_slice(&bytes))
    }

    pub mod opt {
        use super::*;

        pub fn serialize<S>(val: &Option<Address>, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match val {
                Some(val) => super::serialize(val, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(d: D) -> Result<Option<Address>, D::Error>
        where
            D: Deserializer<'de>,
        {
            #[derive(Deserialize)]
            struct Wrapper(#[serde(with = "super")] Address);
            Ok(Option::<Wrapper>::deserialize(d)?.map(|Wrapper(v)| v))
        }
    }
}

/// 0x-hex <-> B256
pub mod b256_hex {
    use super::*;
    use alloy::primitives::B256;

    pub fn serialize<S>(val: &B256, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&format!("0x{}", hex::encode(val.as_slice())))
    }

    pub fn deserialize<'de, D>(d: D) -> Result<B256, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(d)?;
        let bytes = decode_hex::<D::Error>(&s)?;
        if bytes.len() != 32 {
            return Err(D::Error::invalid_length(bytes.len(), &"32-byte hash"));
        }
        Ok(B256::from_slice(&bytes))
    }

    pub mod opt {
        use super::*;

        pub fn serialize<S>(val: &Option<B256>, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match val {
                Some(val) => super::serialize(val, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(d: D) -> Result<Option<B256>, D::Error>
        where
            D: Deserializer<'de>,
        {
            #[derive(Deserialize)]
            struct Wrapper(#[serde(with = "super")] B256);
            Ok(Option::<Wrapper>::deserialize(d)?.map(|Wrapper(v)| v))
        }
    }
}

/// 0x-hex <-> Vec<u8> (accepts "" or "0x" as empty)
pub mod bytes_hex {
    use super::*;

    pub fn serialize<S>(val: &[u8], s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&format!("0x{}", hex::encode(val)))
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(d)?;
        if s.is_empty() || s == "0x" {
            return Ok(vec![]);
        }
        decode_hex::<D::Error>(&s)
    }
}
