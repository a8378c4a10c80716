//! The on-chain message codec.
//!
//! Every message is exactly 32 bytes, sized to ride in a block's
//! representative field:
//!
//! ```text
//! offset  0..3   "TKN" preamble
//! offset  3      op byte
//! offset  4..16  op-specific header, zero-padded
//! offset 16..32  big-endian u128 amount (or zero)
//! ```

use thiserror::Error;

/// Wire size of every message.
pub const PAYLOAD_LEN: usize = 32;

/// Maximum token name length carried by a genesis message.
pub const NAME_LEN: usize = 11;

const PREAMBLE: &[u8; 3] = b"TKN";

const OP_GENESIS: u8 = 1;
const OP_TRANSFER: u8 = 2;
const OP_SWAP_PROPOSE: u8 = 3;
const OP_SWAP_ACCEPT: u8 = 4;
const OP_SWAP_CONFIRM: u8 = 5;
const OP_SWAP_CANCEL: u8 = 6;

/// A payload that is not a protocol message. The replayer treats both cases
/// identically: skip and move on.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("missing preamble")]
    MissingPreamble,
    #[error("unrecognized op {0}")]
    UnrecognizedOp(u8),
    #[error("payload is {0} bytes, expected {PAYLOAD_LEN}")]
    BadLength(usize),
}

/// The closed set of protocol operations.
///
/// `token` and `swap` fields are block heights on the carrying chain; see
/// the chain replayer for how they resolve.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Genesis {
        name: String,
        supply: u128,
        decimals: u8,
    },
    Transfer {
        token: u32,
        amount: u128,
    },
    SwapPropose {
        token: u32,
        amount: u128,
    },
    SwapAccept {
        swap: u32,
        token: u32,
        amount: u128,
    },
    SwapConfirm {
        swap: u32,
    },
    SwapCancel {
        swap: u32,
    },
}

impl Message {
    pub fn op(&self) -> u8 {
        match self {
            Message::Genesis { .. } => OP_GENESIS,
            Message::Transfer { .. } => OP_TRANSFER,
            Message::SwapPropose { .. } => OP_SWAP_PROPOSE,
            Message::SwapAccept { .. } => OP_SWAP_ACCEPT,
            Message::SwapConfirm { .. } => OP_SWAP_CONFIRM,
            Message::SwapCancel { .. } => OP_SWAP_CANCEL,
        }
    }

    /// Serialize to the fixed 32-byte wire form. Names longer than
    /// [`NAME_LEN`] bytes are truncated to their longest character-boundary
    /// prefix, so a multi-byte character is dropped whole rather than split.
    pub fn serialize(&self) -> [u8; PAYLOAD_LEN] {
        let mut out = [0u8; PAYLOAD_LEN];
        out[..3].copy_from_slice(PREAMBLE);
        out[3] = self.op();
        match self {
            Message::Genesis {
                name,
                supply,
                decimals,
            } => {
                out[4] = *decimals;
                let mut len = name.len().min(NAME_LEN);
                // never cut a multi-byte character in half
                while !name.is_char_boundary(len) {
                    len -= 1;
                }
                out[5..5 + len].copy_from_slice(&name.as_bytes()[..len]);
                out[16..].copy_from_slice(&supply.to_be_bytes());
            }
            Message::Transfer { token, amount } | Message::SwapPropose { token, amount } => {
                out[4..8].copy_from_slice(&token.to_be_bytes());
                out[16..].copy_from_slice(&amount.to_be_bytes());
            }
            Message::SwapAccept {
                swap,
                token,
                amount,
            } => {
                out[4..8].copy_from_slice(&swap.to_be_bytes());
                out[8..12].copy_from_slice(&token.to_be_bytes());
                out[16..].copy_from_slice(&amount.to_be_bytes());
            }
            Message::SwapConfirm { swap } | Message::SwapCancel { swap } => {
                out[4..8].copy_from_slice(&swap.to_be_bytes());
            }
        }
        out
    }

    /// Parse a 32-byte payload back into a message.
    pub fn parse(data: &[u8]) -> Result<Message, CodecError> {
        if data.len() != PAYLOAD_LEN {
            return Err(CodecError::BadLength(data.len()));
        }
        if &data[..3] != PREAMBLE {
            return Err(CodecError::MissingPreamble);
        }
        let message = match data[3] {
            OP_GENESIS => Message::Genesis {
                decimals: data[4],
                name: parse_name(&data[5..16]),
                supply: read_u128(data),
            },
            OP_TRANSFER => Message::Transfer {
                token: read_u32(data, 4),
                amount: read_u128(data),
            },
            OP_SWAP_PROPOSE => Message::SwapPropose {
                token: read_u32(data, 4),
                amount: read_u128(data),
            },
            OP_SWAP_ACCEPT => Message::SwapAccept {
                swap: read_u32(data, 4),
                token: read_u32(data, 8),
                amount: read_u128(data),
            },
            OP_SWAP_CONFIRM => Message::SwapConfirm {
                swap: read_u32(data, 4),
            },
            OP_SWAP_CANCEL => Message::SwapCancel {
                swap: read_u32(data, 4),
            },
            op => return Err(CodecError::UnrecognizedOp(op)),
        };
        Ok(message)
    }
}

fn parse_name(field: &[u8]) -> String {
    let end = field
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |index| index + 1);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_be_bytes(bytes)
}

fn read_u128(data: &[u8]) -> u128 {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&data[16..]);
    u128::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn genesis_layout() {
        let message = Message::Genesis {
            name: "TOKEN".into(),
            supply: 1_000_000_000,
            decimals: 5,
        };
        let wire = message.serialize();
        assert_eq!(&wire[..3], b"TKN");
        assert_eq!(wire[3], 1);
        assert_eq!(wire[4], 5);
        assert_eq!(&wire[5..10], b"TOKEN");
        assert_eq!(&wire[10..16], &[0u8; 6]);
        assert_eq!(wire[16..], 1_000_000_000u128.to_be_bytes());
        assert_eq!(Message::parse(&wire).unwrap(), message);
    }

    #[test]
    fn transfer_layout() {
        let message = Message::Transfer {
            token: 0x0102_0304,
            amount: 7,
        };
        let wire = message.serialize();
        assert_eq!(wire[3], 2);
        assert_eq!(&wire[4..8], &[1, 2, 3, 4]);
        assert_eq!(&wire[8..16], &[0u8; 8]);
        assert_eq!(Message::parse(&wire).unwrap(), message);
    }

    #[test]
    fn confirm_and_cancel_have_zero_tails() {
        for message in [
            Message::SwapConfirm { swap: 9 },
            Message::SwapCancel { swap: 9 },
        ] {
            let wire = message.serialize();
            assert_eq!(&wire[8..], &[0u8; 24]);
            assert_eq!(Message::parse(&wire).unwrap(), message);
        }
    }

    #[test]
    fn name_truncates_to_eleven_bytes() {
        let message = Message::Genesis {
            name: "TWELVELETTERS".into(),
            supply: 1,
            decimals: 0,
        };
        match Message::parse(&message.serialize()).unwrap() {
            Message::Genesis { name, .. } => assert_eq!(name, "TWELVELETTE"),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn name_truncation_respects_char_boundaries() {
        // the two-byte é straddles the eleven-byte cut and is dropped whole
        let message = Message::Genesis {
            name: "ABCDEFGHIJé".into(),
            supply: 1,
            decimals: 0,
        };
        let wire = message.serialize();
        assert_eq!(&wire[5..16], b"ABCDEFGHIJ\0");
        match Message::parse(&wire).unwrap() {
            Message::Genesis { name, .. } => assert_eq!(name, "ABCDEFGHIJ"),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn name_strips_trailing_zeros_only() {
        let wire = Message::Genesis {
            name: "AB".into(),
            supply: 1,
            decimals: 0,
        }
        .serialize();
        match Message::parse(&wire).unwrap() {
            Message::Genesis { name, .. } => assert_eq!(name, "AB"),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_preamble() {
        let mut wire = Message::SwapConfirm { swap: 1 }.serialize();
        wire[0] = b'X';
        assert_eq!(Message::parse(&wire), Err(CodecError::MissingPreamble));
    }

    #[test]
    fn rejects_unknown_op() {
        let mut wire = Message::SwapConfirm { swap: 1 }.serialize();
        wire[3] = 7;
        assert_eq!(Message::parse(&wire), Err(CodecError::UnrecognizedOp(7)));
    }

    #[test]
    fn rejects_short_payload() {
        assert_eq!(Message::parse(b"TKN"), Err(CodecError::BadLength(3)));
    }

    fn arbitrary_message() -> impl Strategy<Value = Message> {
        // names restricted to what survives a round trip: at most 11 bytes
        // of printable ASCII (so no trailing NULs)
        let name = "[ -~]{0,11}";
        prop_oneof![
            (name, any::<u128>(), any::<u8>()).prop_map(|(name, supply, decimals)| {
                Message::Genesis {
                    name,
                    supply,
                    decimals,
                }
            }),
            (any::<u32>(), any::<u128>())
                .prop_map(|(token, amount)| Message::Transfer { token, amount }),
            (any::<u32>(), any::<u128>())
                .prop_map(|(token, amount)| Message::SwapPropose { token, amount }),
            (any::<u32>(), any::<u32>(), any::<u128>()).prop_map(|(swap, token, amount)| {
                Message::SwapAccept {
                    swap,
                    token,
                    amount,
                }
            }),
            any::<u32>().prop_map(|swap| Message::SwapConfirm { swap }),
            any::<u32>().prop_map(|swap| Message::SwapCancel { swap }),
        ]
    }

    proptest! {
        #[test]
        fn round_trip(message in arbitrary_message()) {
            let wire = message.serialize();
            prop_assert_eq!(wire.len(), PAYLOAD_LEN);
            prop_assert_eq!(Message::parse(&wire).unwrap(), message);
        }

        #[test]
        fn reserialize_is_identity(message in arbitrary_message()) {
            let wire = message.serialize();
            let reparsed = Message::parse(&wire).unwrap();
            prop_assert_eq!(reparsed.serialize(), wire);
        }

        // arbitrary unicode names: the stored name is a character-boundary
        // prefix of the original and is stable under a second round trip
        #[test]
        fn unicode_names_truncate_cleanly(
            name in any::<String>(),
            supply in any::<u128>(),
            decimals in any::<u8>(),
        ) {
            let wire = Message::Genesis { name: name.clone(), supply, decimals }.serialize();
            let parsed = Message::parse(&wire).unwrap();
            let Message::Genesis { name: stored, supply: s, decimals: d } = parsed.clone() else {
                panic!("unexpected message {parsed:?}");
            };
            prop_assert!(stored.len() <= NAME_LEN);
            prop_assert!(name.starts_with(stored.as_str()));
            prop_assert_eq!(s, supply);
            prop_assert_eq!(d, decimals);
            prop_assert_eq!(Message::parse(&parsed.serialize()).unwrap(), parsed);
        }
    }
}
