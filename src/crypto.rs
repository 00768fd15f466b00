// MIT License - Copyright (c) 2021 TJForc
// Keystream cipher for user-code records

use tracing::debug;

/// Length of the generated keystream; longer records wrap around.
pub const KEYSTREAM_LEN: usize = 255;

/// Decrypts the user-code records returned by `?P=` queries.
///
/// The keystream comes from a 16-bit shift register (taps 2, 4, 16, 32768)
/// seeded from the numeric account value folded with the remote key. Each
/// record restarts the keystream at position zero. Ciphertext travels as ASCII
/// hex pairs, one pair per plaintext byte.
///
/// When the seed folds to 0 the keystream is all zeros and records pass
/// through unchanged apart from the hex decoding.
///
/// This algorithm has not been verified against real DMP panels. If a panel
/// uses a different scheme, decrypted codes come out as garbage, so
/// [`user_codes`](crate::DmpPanel::user_codes) and
/// [`check_code`](crate::DmpPanel::check_code) return wrong or empty results
/// without reporting an error.
#[derive(Debug, Clone)]
pub struct UserCodeCipher {
    seed: u16,
    keystream: [u8; KEYSTREAM_LEN],
}

impl UserCodeCipher {
    pub fn new(account: &str, remote_key: &str) -> Self {
        let seed = Self::derive_seed(account, remote_key);
        Self {
            seed,
            keystream: Self::create_keystream(seed),
        }
    }

    pub fn seed(&self) -> u16 {
        self.seed
    }

    /// Fold the account's numeric value with the remote key bytes.
    pub fn derive_seed(account: &str, remote_key: &str) -> u16 {
        let digits: String = account.chars().filter(|c| c.is_ascii_digit()).collect();
        let account_value = digits.parse::<u32>().unwrap_or(0);
        let mut seed = account_value & 0xFFFF;
        for byte in remote_key.bytes() {
            seed = ((seed << 5) ^ (seed >> 11) ^ byte as u32) & 0xFFFF;
        }
        seed as u16
    }

    /// Generate the shift-register keystream for a seed.
    pub fn create_keystream(seed: u16) -> [u8; KEYSTREAM_LEN] {
        let mut buffer = [0u8; KEYSTREAM_LEN];
        if seed == 0 {
            return buffer;
        }

        let taps: [u32; 4] = [2, 4, 16, 32768];
        let mut register = seed as u32;

        for item in &mut buffer {
            let mut feedback: u32 = 0;
            for &tap in &taps {
                if register & tap > 0 {
                    feedback ^= 1;
                }
            }
            register = ((register << 1) | feedback) & 0xFFFF;
            *item = (register & 255) as u8;
        }

        debug!("Keystream created for seed {}", seed);
        buffer
    }

    /// Decrypt one hex-encoded record.
    ///
    /// Returns an empty string for odd-length or non-hex input so that the
    /// caller's length check drops the record.
    pub fn decrypt(&self, ciphertext: &str) -> String {
        let text = ciphertext.trim();
        if text.len() % 2 != 0 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
            debug!("Discarding undecodable user-code record ({} chars)", text.len());
            return String::new();
        }

        text.as_bytes()
            .chunks(2)
            .enumerate()
            .map(|(i, pair)| {
                let hi = hex_value(pair[0]);
                let lo = hex_value(pair[1]);
                let byte = (hi << 4 | lo) ^ self.keystream[i % KEYSTREAM_LEN];
                byte as char
            })
            .collect()
    }

    /// Inverse of `decrypt`, producing uppercase hex.
    pub fn encrypt(&self, plaintext: &str) -> String {
        plaintext
            .chars()
            .enumerate()
            .map(|(i, c)| {
                let byte = (c as u32 & 0xFF) as u8 ^ self.keystream[i % KEYSTREAM_LEN];
                format!("{:02X}", byte)
            })
            .collect()
    }
}

fn hex_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        b'A'..=b'F' => b - b'A' + 10,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keystream_zero_seed() {
        let buf = UserCodeCipher::create_keystream(0);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_keystream_nonzero_seed() {
        let buf = UserCodeCipher::create_keystream(1);
        assert!(buf.iter().any(|&b| b != 0));
        // register 1 has no taps set, so the first step only shifts
        assert_eq!(buf[0], 2);
        assert_eq!(buf[1], 4 | 1);
    }

    #[test]
    fn test_keystream_differs_per_seed() {
        let a = UserCodeCipher::create_keystream(1234);
        let b = UserCodeCipher::create_keystream(4321);
        assert_ne!(a, b);
    }

    #[test]
    fn test_seed_is_deterministic() {
        let a = UserCodeCipher::derive_seed("1234", "KEY");
        let b = UserCodeCipher::derive_seed("1234", "KEY");
        assert_eq!(a, b);
        assert_ne!(a, UserCodeCipher::derive_seed("1234", "KEZ"));
        assert_ne!(a, UserCodeCipher::derive_seed("1235", "KEY"));
        // padding never changes the account value
        assert_eq!(
            UserCodeCipher::derive_seed("  12", ""),
            UserCodeCipher::derive_seed("12", "")
        );
    }

    #[test]
    fn test_decrypt_inverts_encrypt() {
        let cipher = UserCodeCipher::new("1", "SECRETKEY");
        let record = "00011234FFFFFFFF9876FF001002003004000000000000ALICE";
        let wire = cipher.encrypt(record);
        assert_eq!(wire.len(), record.len() * 2);
        assert_ne!(wire, record);
        assert_eq!(cipher.decrypt(&wire), record);
        assert_eq!(cipher.decrypt(&wire.to_lowercase()), record);
    }

    #[test]
    fn test_keystream_restarts_per_record() {
        let cipher = UserCodeCipher::new("5", "K");
        assert_eq!(cipher.encrypt("ABCD"), cipher.encrypt("ABCD"));
    }

    #[test]
    fn test_wrong_key_does_not_recover_plaintext() {
        let right = UserCodeCipher::new("1", "KEY1");
        let wrong = UserCodeCipher::new("1", "KEY2");
        let wire = right.encrypt("0001CODE");
        assert_ne!(wrong.decrypt(&wire), "0001CODE");
    }

    #[test]
    fn test_invalid_ciphertext_decrypts_to_empty() {
        let cipher = UserCodeCipher::new("1", "KEY");
        assert_eq!(cipher.decrypt("ABC"), "");
        assert_eq!(cipher.decrypt("ZZ00"), "");
        assert_eq!(cipher.decrypt(""), "");
    }

    #[test]
    fn test_records_longer_than_keystream_wrap() {
        let cipher = UserCodeCipher::new("77", "WRAP");
        let long: String = std::iter::repeat('A').take(KEYSTREAM_LEN + 10).collect();
        assert_eq!(cipher.decrypt(&cipher.encrypt(&long)), long);
    }
}
