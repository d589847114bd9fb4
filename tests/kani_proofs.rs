#![cfg(kani)]
//! Kani proof harnesses for the cast-ranking model.
//!
//! The harnesses verify the ranking rules on a model that mirrors
//! `OpenCast::distance`, `dispatch::resolve` and `find_condition_casts`
//! without strings, `Arc`s or trait objects.
//!
//! Model:
//! - A linkage is an array of component distances; its distance is the max.
//! - A candidate is an array of per-argument distances, or `NONE` where no
//!   implicit cast exists; its rank is the max over arguments.
//! - A condition has two flags: an implicit input -> condition cast exists,
//!   an implicit condition -> input cast exists.
//!
//! Run with: `cargo kani --tests --harness <harness_name>`

/// Maximum components / candidates / arguments for bounded proofs.
const MAX_N: usize = 4;

/// Marks an argument with no applicable implicit cast.
const NONE: u32 = u32::MAX;

fn linkage_distance(n: usize, components: &[u32; MAX_N]) -> u32 {
    let mut max = 0;
    let mut i = 0;
    while i < n {
        if components[i] > max {
            max = components[i];
        }
        i += 1;
    }
    max
}

/// Rank of a candidate, or `None` if some argument has no cast.
fn candidate_rank(n_args: usize, distances: &[u32; MAX_N]) -> Option<u32> {
    let mut rank = 0;
    let mut i = 0;
    while i < n_args {
        if distances[i] == NONE {
            return None;
        }
        if distances[i] > rank {
            rank = distances[i];
        }
        i += 1;
    }
    Some(rank)
}

/// `Ok(index)` of the unique minimum, `Err(ties)` with the number of tied
/// candidates (0 when none applies).
fn model_resolve(n: usize, n_args: usize, table: &[[u32; MAX_N]; MAX_N]) -> Result<usize, usize> {
    let mut best: Option<u32> = None;
    let mut winner = 0;
    let mut ties = 0;
    let mut i = 0;
    while i < n {
        if let Some(rank) = candidate_rank(n_args, &table[i]) {
            match best {
                Some(b) if rank > b => {}
                Some(b) if rank == b => ties += 1,
                _ => {
                    best = Some(rank);
                    winner = i;
                    ties = 1;
                }
            }
        }
        i += 1;
    }
    if ties == 1 {
        Ok(winner)
    } else {
        Err(ties)
    }
}

/// (cast input to condition, cast condition to input)
fn model_condition(identical: bool, forward: bool, backward: bool) -> (bool, bool) {
    if identical {
        (false, false)
    } else if forward {
        (true, false)
    } else if backward {
        (false, true)
    } else {
        (false, false)
    }
}

// ---------------------------------------------------------------------------
// Proof 1: Linkage distance is the max, bounded by the sum
// ---------------------------------------------------------------------------

#[kani::proof]
#[kani::unwind(6)]
fn linkage_distance_is_component_max() {
    let n: usize = kani::any();
    kani::assume(n >= 1 && n <= MAX_N);
    let components: [u32; MAX_N] = kani::any();
    let mut i = 0;
    while i < n {
        kani::assume(components[i] <= 1000);
        i += 1;
    }

    let d = linkage_distance(n, &components);
    let mut attained = false;
    let mut sum: u32 = 0;
    let mut j = 0;
    while j < n {
        assert!(d >= components[j]);
        attained |= d == components[j];
        sum += components[j];
        j += 1;
    }
    assert!(attained);
    assert!(d <= sum);
}

// ---------------------------------------------------------------------------
// Proof 2: Dispatch picks a strict minimum or reports the tie
// ---------------------------------------------------------------------------

#[kani::proof]
#[kani::unwind(6)]
fn resolve_picks_strict_minimum() {
    let n: usize = kani::any();
    kani::assume(n >= 1 && n <= MAX_N);
    let n_args: usize = kani::any();
    kani::assume(n_args <= MAX_N);
    let table: [[u32; MAX_N]; MAX_N] = kani::any();

    match model_resolve(n, n_args, &table) {
        Ok(winner) => {
            let rank = candidate_rank(n_args, &table[winner]);
            assert!(rank.is_some());
            let mut i = 0;
            while i < n {
                if i != winner {
                    if let Some(other) = candidate_rank(n_args, &table[i]) {
                        assert!(other > rank.unwrap_or(0));
                    }
                }
                i += 1;
            }
        }
        Err(ties) => assert!(ties != 1),
    }
}

// ---------------------------------------------------------------------------
// Proof 3: Conditions never convert both sides, and input -> condition wins
// ---------------------------------------------------------------------------

#[kani::proof]
fn condition_casts_one_sided() {
    let identical: bool = kani::any();
    let forward: bool = kani::any();
    let backward: bool = kani::any();
    let (to_condition, to_input) = model_condition(identical, forward, backward);
    assert!(!(to_condition && to_input));
    if !identical && forward {
        assert!(to_condition);
    }
    if to_input {
        assert!(!forward && backward);
    }
}
