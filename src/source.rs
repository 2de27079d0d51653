//! Prime item source.
//!
//! The binary seeds the ring with the first primes, each as
//! `{ value: p, counter: p }`, so a prime `p` visits `p` stages before it is
//! finished.

use crate::pipeline::item::Item;

/// Trial division up to `sqrt(x)`.
pub fn is_prime(x: i64) -> bool {
    if x < 2 {
        return false;
    }
    if x % 2 == 0 {
        return x == 2;
    }
    let mut d = 3;
    while d <= x / d {
        if x % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

/// Every prime, in increasing order.
pub fn primes() -> impl Iterator<Item = i64> {
    (2..).filter(|&x| is_prime(x))
}

/// The first `count` primes as items.
pub fn prime_items(count: usize) -> impl Iterator<Item = Item> {
    primes().take(count).map(|p| Item::new(p, p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_primes() {
        let first: Vec<_> = primes().take(10).collect();
        assert_eq!(first, vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
    }

    #[test]
    fn test_is_prime_edges() {
        assert!(!is_prime(-7));
        assert!(!is_prime(0));
        assert!(!is_prime(1));
        assert!(is_prime(2));
        assert!(!is_prime(9));
        assert!(!is_prime(49));
        assert!(is_prime(7919));
    }

    #[test]
    fn test_prime_items_use_prime_as_counter() {
        let items: Vec<_> = prime_items(3).collect();
        assert_eq!(items, vec![Item::new(2, 2), Item::new(3, 3), Item::new(5, 5)]);
    }
}
