//! Private address range allocation for cluster masters.
//!
//! The parent range is split into equal sub-blocks and the lowest free one
//! wins, so the result depends only on the input list.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use tracing::{debug, warn};

use crate::error::CidrError;

/// Private range that master blocks are carved from.
pub const MASTER_PARENT_RANGE: Ipv4Net = Ipv4Net::new_assert(Ipv4Addr::new(172, 16, 0, 0), 12);

/// Prefix length GKE requires for a private master range.
pub const MASTER_BLOCK_PREFIX: u8 = 28;

/// Master range used for public clusters, where it is never sent.
pub const DEFAULT_MASTER_BLOCK: Ipv4Net = Ipv4Net::new_assert(Ipv4Addr::new(172, 16, 0, 0), 28);

/// Primary range of the private subnetwork created for custom networks.
pub const DEFAULT_PRIVATE_SUBNET_RANGE: Ipv4Net =
    Ipv4Net::new_assert(Ipv4Addr::new(10, 0, 0, 0), 24);

/// Find the lowest sub-block of `parent` with prefix `block_prefix` that no
/// entry of `used` falls into.
///
/// A used range occupies the sub-block its address falls into, even when it
/// is not aligned to a sub-block boundary. Ranges outside the parent are
/// ignored.
///
/// # Errors
/// Returns [`CidrError::Exhausted`] when every sub-block is taken and
/// [`CidrError::InvalidPrefix`] when `block_prefix` cannot partition `parent`.
pub fn next_available_block(
    used: &[Ipv4Net],
    parent: Ipv4Net,
    block_prefix: u8,
) -> Result<Ipv4Net, CidrError> {
    let parent_prefix = parent.prefix_len();
    if block_prefix < parent_prefix || block_prefix > 32 {
        return Err(CidrError::InvalidPrefix {
            parent_prefix,
            prefix: block_prefix,
        });
    }

    let slots = 1u64 << (block_prefix - parent_prefix);
    let block_size = 1u64 << (32 - block_prefix);
    let base = u64::from(u32::from(parent.network()));

    let taken: BTreeSet<u64> = used
        .iter()
        .filter_map(|range| u64::from(u32::from(range.addr())).checked_sub(base))
        .map(|delta| delta / block_size)
        .filter(|index| *index < slots)
        .collect();

    // Walk the sorted occupied indexes until the first gap.
    let mut index = 0u64;
    for occupied in &taken {
        if *occupied != index {
            break;
        }
        index += 1;
    }
    if index >= slots {
        return Err(CidrError::Exhausted {
            parent: parent.to_string(),
            prefix: block_prefix,
        });
    }

    // index < slots, so the offset stays inside the parent's u32 range
    let start = base + index * block_size;
    let start = u32::try_from(start).map_err(|_| CidrError::Exhausted {
        parent: parent.to_string(),
        prefix: block_prefix,
    })?;
    Ipv4Net::new(Ipv4Addr::from(start), block_prefix).map_err(|_| CidrError::InvalidPrefix {
        parent_prefix,
        prefix: block_prefix,
    })
}

/// Parse provider-reported source ranges, dropping anything that is not an
/// IPv4 CIDR block.
#[must_use]
pub fn parse_ranges<S: AsRef<str>>(ranges: &[S]) -> Vec<Ipv4Net> {
    ranges
        .iter()
        .filter_map(|raw| {
            let raw = raw.as_ref();
            match raw.parse::<Ipv4Net>() {
                Ok(net) => Some(net),
                Err(e) => {
                    warn!(range = %raw, error = %e, "Ignoring unparseable source range");
                    None
                }
            }
        })
        .collect()
}

/// Choose the master range for a cluster.
///
/// Public clusters get [`DEFAULT_MASTER_BLOCK`]; private clusters get the
/// next free /28 inside [`MASTER_PARENT_RANGE`].
///
/// # Errors
/// Returns [`CidrError::Exhausted`] when the parent range is full.
pub fn select_master_block(private_nodes: bool, used: &[Ipv4Net]) -> Result<Ipv4Net, CidrError> {
    if !private_nodes {
        return Ok(DEFAULT_MASTER_BLOCK);
    }
    let block = next_available_block(used, MASTER_PARENT_RANGE, MASTER_BLOCK_PREFIX)?;
    debug!(block = %block, used = used.len(), "Selected master range");
    Ok(block)
}

/// Check an operator-supplied master range.
///
/// # Errors
/// Returns [`CidrError::Parse`] when the input is not an IPv4 CIDR block, is
/// not a /28, or is already in `used`.
pub fn validate_manual_block(input: &str, used: &[Ipv4Net]) -> Result<Ipv4Net, CidrError> {
    let block: Ipv4Net = input
        .trim()
        .parse()
        .map_err(|_| CidrError::Parse(input.to_string()))?;
    if block.prefix_len() != MASTER_BLOCK_PREFIX {
        return Err(CidrError::Parse(format!(
            "{input} must be a /{MASTER_BLOCK_PREFIX} block"
        )));
    }
    if used.contains(&block) {
        return Err(CidrError::Parse(format!("{input} is already in use")));
    }
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_used_returns_first_block() {
        let block = next_available_block(&[], MASTER_PARENT_RANGE, 28).unwrap();
        assert_eq!(block, net("172.16.0.0/28"));
    }

    #[test]
    fn test_skips_used_first_block() {
        let block = next_available_block(&[net("172.16.0.0/28")], MASTER_PARENT_RANGE, 28).unwrap();
        assert_eq!(block, net("172.16.0.16/28"));
    }

    #[test]
    fn test_fills_gap_between_used_blocks() {
        let used = vec![
            net("172.16.0.0/28"),
            net("172.16.0.32/28"),
            net("172.16.0.16/28"),
            net("172.16.0.64/28"),
        ];
        let block = next_available_block(&used, MASTER_PARENT_RANGE, 28).unwrap();
        assert_eq!(block, net("172.16.0.48/28"));
        assert!(!used.iter().any(|u| u.contains(&block.network())));
        assert!(MASTER_PARENT_RANGE.contains(&block));
    }

    #[test]
    fn test_unaligned_range_truncates_to_containing_block() {
        let block = next_available_block(&[net("172.16.0.5/28")], MASTER_PARENT_RANGE, 28).unwrap();
        assert_eq!(block, net("172.16.0.16/28"));
    }

    #[test]
    fn test_ranges_outside_parent_are_ignored() {
        let used = vec![net("10.0.0.0/28"), net("192.168.0.0/28"), net("172.32.0.0/28")];
        let block = next_available_block(&used, MASTER_PARENT_RANGE, 28).unwrap();
        assert_eq!(block, net("172.16.0.0/28"));
    }

    #[test]
    fn test_exhausted_small_parent() {
        let parent = net("172.16.0.0/26");
        let used: Vec<Ipv4Net> = (0..4u8)
            .map(|i| Ipv4Net::new(Ipv4Addr::new(172, 16, 0, i * 16), 28).unwrap())
            .collect();
        let err = next_available_block(&used, parent, 28).unwrap_err();
        assert_eq!(
            err,
            CidrError::Exhausted {
                parent: "172.16.0.0/26".into(),
                prefix: 28
            }
        );
    }

    #[test]
    fn test_last_free_block_in_full_parent() {
        let parent = net("172.16.0.0/26");
        let used = vec![net("172.16.0.0/28"), net("172.16.0.16/28"), net("172.16.0.48/28")];
        assert_eq!(
            next_available_block(&used, parent, 28).unwrap(),
            net("172.16.0.32/28")
        );
    }

    #[test]
    fn test_invalid_prefix() {
        assert!(matches!(
            next_available_block(&[], MASTER_PARENT_RANGE, 8),
            Err(CidrError::InvalidPrefix { .. })
        ));
        assert!(matches!(
            next_available_block(&[], MASTER_PARENT_RANGE, 33),
            Err(CidrError::InvalidPrefix { .. })
        ));
    }

    #[test]
    fn test_select_master_block() {
        let used = vec![net("172.16.0.0/28")];
        assert_eq!(select_master_block(false, &used).unwrap(), DEFAULT_MASTER_BLOCK);
        assert_eq!(
            select_master_block(true, &used).unwrap(),
            net("172.16.0.16/28")
        );
    }

    #[test]
    fn test_parse_ranges_drops_garbage() {
        let parsed = parse_ranges(&["172.16.0.0/28", "not-a-cidr", "172.16.0.16/28"]);
        assert_eq!(parsed, vec![net("172.16.0.0/28"), net("172.16.0.16/28")]);
    }

    #[test]
    fn test_validate_manual_block() {
        let used = vec![net("172.16.0.0/28")];
        assert_eq!(
            validate_manual_block("172.16.0.32/28", &used).unwrap(),
            net("172.16.0.32/28")
        );
        assert!(validate_manual_block("172.16.0.0/28", &used).is_err());
        assert!(validate_manual_block("300.1.1.1/28", &used).is_err());
    }

    #[test]
    fn test_manual_block_must_be_a_28() {
        let err = validate_manual_block("172.16.1.0/24", &[]).unwrap_err();
        assert!(err.to_string().contains("must be a /28 block"));
        assert!(validate_manual_block("172.16.1.0/29", &[]).is_err());
    }

    #[test]
    fn test_widest_split_does_not_enumerate_every_block() {
        let parent = net("0.0.0.0/0");
        let used = vec![net("0.0.0.0/32"), net("0.0.0.1/32"), net("0.0.0.3/32")];
        assert_eq!(next_available_block(&used, parent, 32).unwrap(), net("0.0.0.2/32"));
        assert_eq!(next_available_block(&[], parent, 32).unwrap(), net("0.0.0.0/32"));
    }
}
