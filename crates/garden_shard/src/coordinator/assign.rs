//! Round-robin partitioning of plants over workers.

/// Largest batch a single assignment call may carry.
pub const DEFAULT_BATCH_LIMIT: usize = 1_000;

/// `min(limit, ceil(remaining / workers))`, never zero.
pub fn batch_size(remaining: usize, workers: usize, limit: usize) -> usize {
    if workers == 0 {
        return 0;
    }
    remaining.div_ceil(workers).min(limit).max(1)
}

/// Splits `items` into rounds; each round holds at most one batch per worker,
/// in worker order.
///
/// With `n` items and `w` workers the first rounds give every worker
/// `batch_size(n, w, limit)` items, so each worker ends up with roughly
/// `n / w` items overall.
pub fn plan_rounds<T>(items: Vec<T>, workers: usize, limit: usize) -> Vec<Vec<Vec<T>>> {
    if workers == 0 || items.is_empty() {
        return Vec::new();
    }

    let size = batch_size(items.len(), workers, limit);
    let mut rounds = Vec::new();
    let mut round = Vec::with_capacity(workers);
    let mut items = items.into_iter().peekable();

    while items.peek().is_some() {
        let batch: Vec<T> = items.by_ref().take(size).collect();
        round.push(batch);
        if round.len() == workers {
            rounds.push(std::mem::replace(&mut round, Vec::with_capacity(workers)));
        }
    }
    if !round.is_empty() {
        rounds.push(round);
    }
    rounds
}

/// Deals `items` one by one over `workers` buckets.
pub fn round_robin<T>(items: Vec<T>, workers: usize) -> Vec<Vec<T>> {
    let mut buckets: Vec<Vec<T>> = (0..workers).map(|_| Vec::new()).collect();
    if workers == 0 {
        return buckets;
    }
    for (index, item) in items.into_iter().enumerate() {
        buckets[index % workers].push(item);
    }
    buckets
}
