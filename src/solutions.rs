//! UTXO selection
//!
//! Turns "spend this much of this token" into spending-solution groups the
//! circuits accept. The circuit only proves 1, 2, or 8 nullifiers and 2 or 3
//! output commitments, so selection is as much about arity as about value.
//!
//! Selection per token: try the simple path first (one tree covering the
//! whole requirement with a valid arity), then fall back to the complex
//! multi-group solver that slices outputs and the unshield across trees.

use std::collections::{BTreeMap, HashSet};

use crate::error::{EngineError, EngineResult};
use crate::wallet::Txo;

/// Nullifier counts the circuits accept
pub const VALID_INPUT_COUNTS: [usize; 3] = [1, 2, 8];

/// Hard cap on inputs per group
pub const MAX_INPUTS: usize = 8;

pub fn is_valid_nullifier_count(count: usize) -> bool {
    VALID_INPUT_COUNTS.contains(&count)
}

/// Three-output groups forbid the disallowed wire-count combination of
/// exactly three inputs
pub fn is_valid_for_3_outputs(count: usize) -> bool {
    count != 3 && is_valid_nullifier_count(count)
}

/// Unspent value in one tree for one token
#[derive(Clone, Debug, Default)]
pub struct TreeBalance {
    pub balance: u128,
    pub utxos: Vec<Txo>,
}

impl TreeBalance {
    pub fn from_utxos(utxos: Vec<Txo>) -> Self {
        let balance = utxos.iter().map(|u| u.note.value).sum();
        Self { balance, utxos }
    }
}

/// One sub-transaction's worth of spending: UTXOs from a single tree covering
/// a slice of the requested outputs plus an unshield slice
#[derive(Clone, Debug)]
pub struct SpendingSolutionGroup {
    pub spending_tree: u32,
    pub utxos: Vec<Txo>,
    /// `(original output index, value covered by this group)`
    pub output_values: Vec<(usize, u128)>,
    pub unshield_value: u128,
}

impl SpendingSolutionGroup {
    pub fn input_total(&self) -> u128 {
        self.utxos.iter().map(|u| u.note.value).sum()
    }

    pub fn required_total(&self) -> u128 {
        self.output_values.iter().map(|(_, v)| *v).sum::<u128>() + self.unshield_value
    }

    /// Change left after covering outputs and unshield
    pub fn change_value(&self) -> u128 {
        self.input_total() - self.required_total()
    }
}

/// Greedy exact-cover search inside one tree.
///
/// UTXOs sort by ascending `(value, leafIndex)`; for each allowed arity in
/// ascending order a window of that width slides right and the first window
/// covering the target wins. Window sums grow monotonically, so the first
/// cover is the least over-sum for its arity, and trying small arities first
/// keeps the input count minimal.
pub fn find_exact_solutions_over_target_value(
    tree_balance: &TreeBalance,
    target: u128,
    three_outputs: bool,
) -> Option<Vec<Txo>> {
    if target == 0 || tree_balance.balance < target {
        return None;
    }
    let mut sorted: Vec<&Txo> = tree_balance.utxos.iter().filter(|u| !u.spent).collect();
    sorted.sort_by_key(|u| (u.note.value, u.tree_number, u.leaf_index));

    for arity in VALID_INPUT_COUNTS {
        if arity > sorted.len() {
            break;
        }
        if three_outputs && !is_valid_for_3_outputs(arity) {
            continue;
        }
        let mut window_sum: u128 = sorted[..arity].iter().map(|u| u.note.value).sum();
        for start in 0..=sorted.len() - arity {
            if start > 0 {
                window_sum -= sorted[start - 1].note.value;
                window_sum += sorted[start + arity - 1].note.value;
            }
            if window_sum >= target {
                return Some(sorted[start..start + arity].iter().map(|u| (*u).clone()).collect());
            }
        }
    }
    None
}

/// Build spending-solution groups for one token.
///
/// `output_values` are the requested regular output values in caller order;
/// group `output_values` refer back to them by index so sliced outputs can be
/// reassembled into notes.
pub fn create_spending_solution_groups(
    tree_balances: &BTreeMap<u32, TreeBalance>,
    output_values: &[u128],
    unshield_value: u128,
) -> EngineResult<Vec<SpendingSolutionGroup>> {
    let required = output_values
        .iter()
        .try_fold(unshield_value, |acc, v| acc.checked_add(*v))
        .ok_or(EngineError::ValueOverflow("output total"))?;
    let available: u128 = tree_balances.values().map(|tb| tb.balance).sum();
    if available < required {
        return Err(EngineError::InsufficientBalance {
            required,
            available,
        });
    }

    // Simple path: the whole requirement from one tree in one group.
    let three_outputs = unshield_value > 0 && !output_values.is_empty();
    let group_capacity = if unshield_value > 0 { 1 } else { 2 };
    if output_values.len() <= group_capacity {
        for (tree, balance) in tree_balances {
            if let Some(utxos) =
                find_exact_solutions_over_target_value(balance, required, three_outputs)
            {
                tracing::debug!(tree, inputs = utxos.len(), "simple spending solution");
                return Ok(vec![SpendingSolutionGroup {
                    spending_tree: *tree,
                    utxos,
                    output_values: output_values.iter().copied().enumerate().collect(),
                    unshield_value,
                }]);
            }
        }
    }

    // Complex path: satisfy each output, then the unshield, slicing across
    // trees and never reusing a UTXO.
    let mut groups = Vec::new();
    let mut excluded: HashSet<(u32, u64)> = HashSet::new();
    for (index, value) in output_values.iter().enumerate() {
        groups.extend(create_groups_for_requirement(
            tree_balances,
            Some(index),
            *value,
            &mut excluded,
        )?);
    }
    if unshield_value > 0 {
        groups.extend(create_groups_for_requirement(
            tree_balances,
            None,
            unshield_value,
            &mut excluded,
        )?);
    }
    Ok(groups)
}

/// Cover one requirement (a single output or the unshield) with one or more
/// single-tree groups, spending at most [`MAX_INPUTS`] UTXOs per group.
fn create_groups_for_requirement(
    tree_balances: &BTreeMap<u32, TreeBalance>,
    output_index: Option<usize>,
    value: u128,
    excluded: &mut HashSet<(u32, u64)>,
) -> EngineResult<Vec<SpendingSolutionGroup>> {
    let mut remaining = value;
    let mut groups = Vec::new();

    for (tree, balance) in tree_balances {
        if remaining == 0 {
            break;
        }
        let usable: Vec<Txo> = balance
            .utxos
            .iter()
            .filter(|u| !u.spent && !excluded.contains(&(u.tree_number, u.leaf_index)))
            .cloned()
            .collect();
        if usable.is_empty() {
            continue;
        }
        let usable_balance = TreeBalance::from_utxos(usable.clone());

        // Finish within this tree if it can cover the remainder.
        if let Some(utxos) = find_exact_solutions_over_target_value(&usable_balance, remaining, false)
        {
            for utxo in &utxos {
                excluded.insert((utxo.tree_number, utxo.leaf_index));
            }
            groups.push(make_group(*tree, utxos, output_index, remaining));
            remaining = 0;
            break;
        }

        // Otherwise drain the largest valid arity this tree offers and slice.
        let arity = VALID_INPUT_COUNTS
            .iter()
            .rev()
            .copied()
            .find(|a| *a <= usable.len().min(MAX_INPUTS))
            .unwrap_or(0);
        if arity == 0 {
            continue;
        }
        let mut drained = usable;
        drained.sort_by(|a, b| {
            b.note
                .value
                .cmp(&a.note.value)
                .then(a.leaf_index.cmp(&b.leaf_index))
        });
        drained.truncate(arity);
        let covered: u128 = drained.iter().map(|u| u.note.value).sum();
        if covered == 0 {
            continue;
        }
        for utxo in &drained {
            excluded.insert((utxo.tree_number, utxo.leaf_index));
        }
        let slice = covered.min(remaining);
        groups.push(make_group(*tree, drained, output_index, slice));
        remaining -= slice;
    }

    if remaining > 0 {
        tracing::debug!(?output_index, remaining, "requirement unsatisfiable without consolidation");
        return Err(EngineError::ConsolidateBalanceRequired);
    }
    Ok(groups)
}

fn make_group(
    tree: u32,
    utxos: Vec<Txo>,
    output_index: Option<usize>,
    slice: u128,
) -> SpendingSolutionGroup {
    match output_index {
        Some(index) => SpendingSolutionGroup {
            spending_tree: tree,
            utxos,
            output_values: vec![(index, slice)],
            unshield_value: 0,
        },
        None => SpendingSolutionGroup {
            spending_tree: tree,
            utxos,
            output_values: Vec::new(),
            unshield_value: slice,
        },
    }
}
