//! Partition planning.
//!
//! Splits a base query into the partitions the producer hands out, one outer
//! list per group and one descriptor per repartition slice inside each group:
//!
//! ```text
//! group_col=site [north, south], repartition_col=day [0..7, 7..14]
//!
//!   [ [ site='north' AND 0<=day<7,  site='north' AND 7<=day<14 ],
//!     [ site='south' AND 0<=day<7,  site='south' AND 7<=day<14 ] ]
//! ```
//!
//! Windows never cross a descriptor boundary, so grouping also guarantees that
//! a window never mixes rows from two groups.

use crate::error::{LoaderError, Result};
use crate::query::{PartitionDescriptor, PartitionScheme, Predicate, Query};

/// Plans the partitions for `base_query`.
///
/// # Errors
/// - `Configuration` if exactly one of `group_col`/`group_scheme` or exactly one
///   of `repartition_col`/`repartition_scheme` is given
/// - `Configuration` if a scheme is empty or contains an empty range
pub fn plan(
    base_query: &Query,
    group_col: Option<&str>,
    group_scheme: Option<&PartitionScheme>,
    repartition_col: Option<&str>,
    repartition_scheme: Option<&PartitionScheme>,
) -> Result<Vec<Vec<PartitionDescriptor>>> {
    let groups = paired("group", group_col, group_scheme)?;
    let slices = paired("repartition", repartition_col, repartition_scheme)?;

    // A missing level contributes a single empty conjunction.
    let group_predicates: Vec<Vec<Predicate>> = match groups {
        Some((column, scheme)) => scheme
            .predicates(column)
            .into_iter()
            .map(|p| vec![p])
            .collect(),
        None => vec![Vec::new()],
    };
    let slice_predicates: Vec<Vec<Predicate>> = match slices {
        Some((column, scheme)) => scheme
            .predicates(column)
            .into_iter()
            .map(|p| vec![p])
            .collect(),
        None => vec![Vec::new()],
    };

    let mut ordinal = 0;
    let mut planned = Vec::with_capacity(group_predicates.len());
    for (group, group_filter) in group_predicates.iter().enumerate() {
        let mut partitions = Vec::with_capacity(slice_predicates.len());
        for slice_filter in &slice_predicates {
            partitions.push(PartitionDescriptor {
                ordinal,
                group,
                query: base_query.clone(),
                predicates: group_filter.iter().chain(slice_filter).cloned().collect(),
            });
            ordinal += 1;
        }
        planned.push(partitions);
    }
    Ok(planned)
}

/// Enforces the both-or-neither rule and validates the scheme.
fn paired<'a>(
    level: &str,
    column: Option<&'a str>,
    scheme: Option<&'a PartitionScheme>,
) -> Result<Option<(&'a str, &'a PartitionScheme)>> {
    match (column, scheme) {
        (None, None) => Ok(None),
        (Some(column), Some(scheme)) => {
            if column.is_empty() {
                return Err(LoaderError::config(format!(
                    "{}_col must not be an empty string",
                    level
                )));
            }
            if scheme.len() == 0 {
                return Err(LoaderError::config(format!(
                    "{}_scheme for column '{}' must list at least one partition",
                    level, column
                )));
            }
            if let PartitionScheme::Ranges(ranges) = scheme {
                if let Some((lower, upper)) = ranges.iter().find(|(lo, hi)| !(lo < hi)) {
                    return Err(LoaderError::config(format!(
                        "{}_scheme range [{}, {}) for column '{}' is empty",
                        level, lower, upper, column
                    )));
                }
            }
            Ok(Some((column, scheme)))
        }
        (Some(column), None) => Err(LoaderError::config(format!(
            "{}_col '{}' was given without {}_scheme; provide both or neither",
            level, column, level
        ))),
        (None, Some(_)) => Err(LoaderError::config(format!(
            "{}_scheme was given without {}_col; provide both or neither",
            level, level
        ))),
    }
}
