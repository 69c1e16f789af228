// SPDX-License-Identifier: AGPL-3.0-only

//! Endpoint id lists
//!
//! Operators name endpoints as a comma-separated list of ids and inclusive
//! ranges: `0,3-5,9` expands to `[0, 3, 4, 5, 9]`. Parsing happens before
//! any device is opened, so a malformed list never touches hardware.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Reasons an id list is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdListError {
    /// The list contained no ids at all
    #[error("Empty endpoint id list")]
    Empty,

    /// A segment between commas was blank
    #[error("Empty segment in id list '{list}'")]
    EmptySegment {
        /// Full input
        list: String,
    },

    /// A token was not a non-negative integer
    #[error("Invalid endpoint id '{token}'")]
    InvalidId {
        /// Offending token
        token: String,
    },

    /// A segment had more than one dash
    #[error("Malformed segment '{segment}' (comma separated list of ids or ranges expected)")]
    Malformed {
        /// Offending segment
        segment: String,
    },

    /// A range whose lower bound exceeds its upper bound
    #[error("Invalid interval '{segment}'")]
    InvertedRange {
        /// Offending segment
        segment: String,
    },

    /// A range covering more ids than [`MAX_RANGE_SPAN`]
    #[error("Range '{segment}' spans more than {MAX_RANGE_SPAN} ids")]
    RangeTooWide {
        /// Offending segment
        segment: String,
    },
}

/// Largest number of ids a single `lo-hi` segment may expand to
pub const MAX_RANGE_SPAN: u32 = 1 << 16;

/// Ordered endpoint ids as written on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointIds(Vec<u32>);

impl EndpointIds {
    /// Parse a list such as `1,3-5,9`
    ///
    /// # Errors
    ///
    /// Returns an [`IdListError`] for blank lists or segments, non-integer
    /// tokens, segments with more than one dash, inverted ranges and ranges
    /// wider than [`MAX_RANGE_SPAN`].
    pub fn parse(list: &str) -> Result<Self, IdListError> {
        if list.trim().is_empty() {
            return Err(IdListError::Empty);
        }

        let mut ids = Vec::new();
        for segment in list.split(',') {
            let segment = segment.trim();
            if segment.is_empty() {
                return Err(IdListError::EmptySegment {
                    list: list.to_string(),
                });
            }

            let bounds: Vec<&str> = segment.split('-').collect();
            match bounds.as_slice() {
                [single] => ids.push(parse_id(single)?),
                [lo, hi] => {
                    let (lo, hi) = (parse_id(lo)?, parse_id(hi)?);
                    if lo > hi {
                        return Err(IdListError::InvertedRange {
                            segment: segment.to_string(),
                        });
                    }
                    if hi - lo >= MAX_RANGE_SPAN {
                        return Err(IdListError::RangeTooWide {
                            segment: segment.to_string(),
                        });
                    }
                    ids.extend(lo..=hi);
                }
                _ => {
                    return Err(IdListError::Malformed {
                        segment: segment.to_string(),
                    })
                }
            }
        }

        Ok(Self(ids))
    }

    /// Ids in command-line order
    #[must_use]
    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    /// Consume into the underlying vector
    #[must_use]
    pub fn into_vec(self) -> Vec<u32> {
        self.0
    }
}

fn parse_id(token: &str) -> Result<u32, IdListError> {
    let token = token.trim();
    // u32::from_str accepts a leading '+'
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IdListError::InvalidId {
            token: token.to_string(),
        });
    }
    token.parse().map_err(|_| IdListError::InvalidId {
        token: token.to_string(),
    })
}

impl FromStr for EndpointIds {
    type Err = IdListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for EndpointIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join(&self.0))
    }
}

/// Render ids as a bare comma list (`0,1,2`)
#[must_use]
pub fn join(ids: &[u32]) -> String {
    ids.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parse(s: &str) -> Result<Vec<u32>, IdListError> {
        EndpointIds::parse(s).map(EndpointIds::into_vec)
    }

    #[test]
    fn expands_singles_and_ranges_in_order() {
        assert_eq!(parse("1,3-5,9").unwrap(), vec![1, 3, 4, 5, 9]);
        assert_eq!(parse("0-2").unwrap(), vec![0, 1, 2]);
        assert_eq!(parse("7").unwrap(), vec![7]);
        assert_eq!(parse("4-4").unwrap(), vec![4]);
        assert_eq!(parse(" 2 , 0 ").unwrap(), vec![2, 0]);
    }

    #[test]
    fn rejects_inverted_range() {
        assert_eq!(
            parse("5-3"),
            Err(IdListError::InvertedRange { segment: "5-3".into() })
        );
    }

    #[test]
    fn rejects_ranges_wider_than_the_cap() {
        assert!(matches!(
            parse("0-4000000000"),
            Err(IdListError::RangeTooWide { .. })
        ));
        assert!(matches!(
            parse("1,0-65536"),
            Err(IdListError::RangeTooWide { segment }) if segment == "0-65536"
        ));
        assert_eq!(parse("0-65535").map(|ids| ids.len()), Ok(65536));
    }

    #[test]
    fn rejects_more_than_one_dash() {
        assert!(matches!(parse("1-2-3"), Err(IdListError::Malformed { .. })));
    }

    #[test]
    fn rejects_non_integer_tokens() {
        for bad in ["a", "1,b", "1-x", "-3", "+4", "1.5", "99999999999"] {
            assert!(
                matches!(parse(bad), Err(IdListError::InvalidId { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_blank_input() {
        assert_eq!(parse(""), Err(IdListError::Empty));
        assert!(matches!(parse("1,,2"), Err(IdListError::EmptySegment { .. })));
    }

    #[test]
    fn displays_as_comma_list() {
        assert_eq!(EndpointIds::parse("0-2").unwrap().to_string(), "0,1,2");
    }

    proptest! {
        #[test]
        fn written_segments_expand_exactly(segments in prop::collection::vec((0u32..200, 0u32..8), 1..6)) {
            let mut text = Vec::new();
            let mut expected = Vec::new();
            for (lo, width) in segments {
                if width == 0 {
                    text.push(lo.to_string());
                    expected.push(lo);
                } else {
                    text.push(format!("{lo}-{}", lo + width));
                    expected.extend(lo..=lo + width);
                }
            }
            prop_assert_eq!(parse(&text.join(",")).unwrap(), expected);
        }

        #[test]
        fn any_inverted_range_fails(lo in 1u32..1000, gap in 1u32..1000) {
            let list = format!("0,{}-{}", lo + gap, lo);
            let is_inverted = matches!(parse(&list), Err(IdListError::InvertedRange { .. }));
            prop_assert!(is_inverted);
        }
    }
}
