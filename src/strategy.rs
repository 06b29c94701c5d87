use std::{fmt, str::FromStr};

use crate::{
    block::HEADER_SIZE,
    error::ParseStrategyError,
    freelist::{Entry, FreeList},
    region::Region,
};

/// Policy used to pick the free block that serves an allocation.
///
/// [`Strategy::BestFit`] and [`Strategy::WorstFit`] compare the payload size
/// of each free block against the request. [`Strategy::FirstFit`] and
/// [`Strategy::NextFit`] compare it against the request *plus* one header,
/// so they never pick a block that is exactly as big as the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Smallest free block that fits. Ties go to the first one in the list.
    #[default]
    BestFit,
    /// Largest free block that fits. Ties go to the first one in the list.
    WorstFit,
    /// First block from the head of the list that fits.
    FirstFit,
    /// Like [`Strategy::FirstFit`] but the scan starts where the previous
    /// allocation left off and wraps around once.
    NextFit,
}

/// Picks the free block that should serve a request of `size` payload bytes
/// (already aligned), or `None` if there isn't any.
pub(crate) fn select(
    strategy: Strategy,
    free_list: &FreeList,
    region: &Region,
    size: usize,
) -> Option<Entry> {
    let total = HEADER_SIZE + size;

    match strategy {
        Strategy::BestFit => free_list
            .iter(region)
            .filter(|entry| entry.node.size >= size)
            .min_by_key(|entry| entry.node.size),

        Strategy::WorstFit => free_list
            .iter(region)
            .filter(|entry| entry.node.size >= size)
            .reduce(|best, entry| if entry.node.size > best.node.size { entry } else { best }),

        Strategy::FirstFit => free_list.iter(region).find(|entry| entry.node.size >= total),

        Strategy::NextFit => {
            let fits = |entry: &Entry| entry.node.size >= total;

            match free_list.rover() {
                None => free_list.iter(region).find(fits),
                Some(start) => free_list
                    .iter(region)
                    .skip_while(|entry| entry.offset != start)
                    .find(fits)
                    .or_else(|| {
                        free_list
                            .iter(region)
                            .take_while(|entry| entry.offset != start)
                            .find(fits)
                    }),
            }
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::BestFit => "best-fit",
            Strategy::WorstFit => "worst-fit",
            Strategy::FirstFit => "first-fit",
            Strategy::NextFit => "next-fit",
        };

        f.write_str(name)
    }
}

impl FromStr for Strategy {
    type Err = ParseStrategyError;

    /// Accepts `best`, `best-fit`, `best_fit` and so on, in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.to_ascii_lowercase().replace('_', "-");
        let name = name.strip_suffix("-fit").unwrap_or(&name);

        match name {
            "best" => Ok(Strategy::BestFit),
            "worst" => Ok(Strategy::WorstFit),
            "first" => Ok(Strategy::FirstFit),
            "next" => Ok(Strategy::NextFit),
            _ => Err(ParseStrategyError(s.to_string())),
        }
    }
}
