//! # XOR-Metric Routing Table
//!
//! A binary trie of k-buckets covering the 160-bit identifier space. The
//! table starts as a single bucket over the whole space and splits a bucket
//! only while it covers the local identifier, so the trie grows O(log n)
//! buckets along the local path and every other range stays a flat,
//! size-bounded list.
//!
//! Buckets keep contacts ordered least-recently-seen first. A full bucket
//! that cannot split challenges its stalest contact with a ping instead of
//! accepting the newcomer outright: long-lived nodes are likelier to remain
//! long-lived, which resists table takeover by short-lived identities. The
//! table itself never performs I/O — [`RoutingTable::observe`] hands an
//! [`EvictionChallenge`] back to the caller, and the verdict returns through
//! [`RoutingTable::apply_challenge`].

use tracing::{debug, trace};

use crate::identity::{distance_cmp, Contact, Distance, NodeId, ID_BITS};

/// Default replication parameter: per-bucket capacity and result-set size.
pub const DEFAULT_K: usize = 20;

/// A contiguous identifier range `[low, high)` holding up to `k` contacts.
///
/// The range is the set of identifiers sharing the first `depth` bits of
/// `prefix`; `depth == 0` is the whole space.
#[derive(Debug, Clone)]
pub struct KBucket {
    prefix: NodeId,
    depth: usize,
    contacts: Vec<Contact>,
    challenge_pending: bool,
}

impl KBucket {
    fn root() -> Self {
        Self {
            prefix: NodeId::from_bytes([0u8; 20]),
            depth: 0,
            contacts: Vec::new(),
            challenge_pending: false,
        }
    }

    /// Whether `id` falls inside this bucket's half-open range.
    #[inline]
    pub fn covers(&self, id: &NodeId) -> bool {
        self.prefix.common_prefix_length(id) >= self.depth
    }

    /// Inclusive lower bound of the range.
    pub fn range_low(&self) -> NodeId {
        self.prefix
    }

    /// Exclusive upper bound of the range; `None` stands for 2^160.
    pub fn range_high(&self) -> Option<NodeId> {
        if self.depth == 0 {
            return None;
        }
        let mut bytes = *self.prefix.as_bytes();
        let mut i = self.depth - 1;
        loop {
            let mask = 0x80u8 >> (i % 8);
            if bytes[i / 8] & mask == 0 {
                bytes[i / 8] |= mask;
                return Some(NodeId::from_bytes(bytes));
            }
            bytes[i / 8] &= !mask;
            if i == 0 {
                return None;
            }
            i -= 1;
        }
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Contacts in least-recently-seen-first order.
    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    /// XOR distance from `target` to this bucket's range: the distance of
    /// the prefix with all bits below `depth` zeroed. Disjoint trie cells
    /// diverge above both depths, so this orders buckets totally.
    fn prefix_distance(&self, target: &NodeId) -> Distance {
        let mut dist = self.prefix.xor_distance(target);
        let whole_bytes = self.depth / 8;
        let spare_bits = self.depth % 8;
        for byte in dist.iter_mut().skip(whole_bytes + usize::from(spare_bits > 0)) {
            *byte = 0;
        }
        if spare_bits > 0 {
            dist[whole_bytes] &= 0xffu8 << (8 - spare_bits);
        }
        dist
    }
}

/// A request to ping the least-recently-seen contact of a full bucket.
///
/// Emitted by [`RoutingTable::observe`] when a full, unsplittable bucket
/// sees a new identifier. The caller pings `head` and reports back via
/// [`RoutingTable::apply_challenge`]; until then the bucket drops further
/// newcomers.
#[derive(Debug, Clone)]
pub struct EvictionChallenge {
    pub head: Contact,
    pub newcomer: Contact,
}

/// Outcome of feeding one observed contact into the table.
#[derive(Debug, Clone)]
pub enum ObserveOutcome {
    /// The contact was the local node (or otherwise not table material).
    Ignored,
    /// Known identifier moved to the most-recently-seen position.
    Refreshed,
    /// Appended to a bucket with spare capacity.
    Inserted,
    /// Bucket full and already mid-challenge; the newcomer was discarded.
    Dropped,
    /// Bucket full; the caller should ping the head and report back.
    Challenge(EvictionChallenge),
}

#[derive(Debug)]
pub struct RoutingTable {
    local: NodeId,
    k: usize,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    pub fn new(local: NodeId, k: usize) -> Self {
        assert!(k > 0, "bucket capacity must be positive");
        Self {
            local,
            k,
            buckets: vec![KBucket::root()],
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn contact_count(&self) -> usize {
        self.buckets.iter().map(|b| b.contacts.len()).sum()
    }

    pub fn buckets(&self) -> &[KBucket] {
        &self.buckets
    }

    fn bucket_index_of(&self, id: &NodeId) -> usize {
        self.buckets
            .iter()
            .position(|b| b.covers(id))
            .expect("buckets partition the identifier space")
    }

    /// Insert or refresh a contact.
    ///
    /// Never blocks and never performs I/O; at most it asks the caller to
    /// run one eviction challenge.
    pub fn observe(&mut self, contact: Contact) -> ObserveOutcome {
        if contact.id == self.local {
            return ObserveOutcome::Ignored;
        }

        loop {
            let idx = self.bucket_index_of(&contact.id);
            let bucket = &mut self.buckets[idx];

            if let Some(pos) = bucket.contacts.iter().position(|c| c.id == contact.id) {
                // Most recent address wins.
                bucket.contacts.remove(pos);
                bucket.contacts.push(contact);
                return ObserveOutcome::Refreshed;
            }

            if bucket.contacts.len() < self.k {
                trace!(peer = %contact, bucket = idx, "routing table insert");
                bucket.contacts.push(contact);
                return ObserveOutcome::Inserted;
            }

            // Full bucket: split while it still covers us, challenge otherwise.
            if bucket.covers(&self.local) && bucket.depth < ID_BITS {
                self.split(idx);
                continue;
            }

            if bucket.challenge_pending {
                return ObserveOutcome::Dropped;
            }

            bucket.challenge_pending = true;
            let head = bucket.contacts[0];
            debug!(head = %head, newcomer = %contact, "bucket full, challenging head");
            return ObserveOutcome::Challenge(EvictionChallenge {
                head,
                newcomer: contact,
            });
        }
    }

    /// Split the bucket at `idx` at the midpoint of its range and
    /// redistribute its contacts between the two halves.
    fn split(&mut self, idx: usize) {
        let bucket = self.buckets.remove(idx);
        let depth = bucket.depth;

        let mut zero = KBucket {
            prefix: bucket.prefix,
            depth: depth + 1,
            contacts: Vec::new(),
            challenge_pending: false,
        };
        let mut one = KBucket {
            prefix: bucket.prefix.with_bit(depth, true),
            depth: depth + 1,
            contacts: Vec::new(),
            challenge_pending: false,
        };

        for contact in bucket.contacts {
            if contact.id.bit(depth) {
                one.contacts.push(contact);
            } else {
                zero.contacts.push(contact);
            }
        }

        debug!(
            depth = depth + 1,
            lower = zero.contacts.len(),
            upper = one.contacts.len(),
            "split bucket on local path"
        );

        // Keep buckets ordered by range start.
        self.buckets.insert(idx, one);
        self.buckets.insert(idx, zero);
    }

    /// Settle an eviction challenge issued by [`observe`](Self::observe).
    ///
    /// A live head is moved to the most-recently-seen position and the
    /// newcomer is discarded; a head that failed to answer before the
    /// deadline is [`remove`](Self::remove)d and the newcomer takes the
    /// tail slot.
    pub fn apply_challenge(&mut self, head_id: NodeId, newcomer: Contact, head_alive: bool) {
        let idx = self.bucket_index_of(&head_id);
        self.buckets[idx].challenge_pending = false;

        if head_alive {
            let bucket = &mut self.buckets[idx];
            if let Some(pos) = bucket.contacts.iter().position(|c| c.id == head_id) {
                let head = bucket.contacts.remove(pos);
                bucket.contacts.push(head);
            }
            trace!(newcomer = %newcomer, "head answered challenge, newcomer dropped");
            return;
        }

        self.remove(&head_id);
        let bucket = &mut self.buckets[idx];
        let known = bucket.contacts.iter().any(|c| c.id == newcomer.id);
        if !known && bucket.contacts.len() < self.k {
            debug!(evicted = %head_id, newcomer = %newcomer, "head evicted after failed challenge");
            bucket.contacts.push(newcomer);
        }
    }

    /// Remove a contact outright. Only the eviction challenge takes this
    /// path, when its ping goes unanswered; ordinary lookup failures leave
    /// the table alone.
    pub fn remove(&mut self, id: &NodeId) -> bool {
        let idx = self.bucket_index_of(id);
        let bucket = &mut self.buckets[idx];
        if let Some(pos) = bucket.contacts.iter().position(|c| &c.id == id) {
            bucket.contacts.remove(pos);
            true
        } else {
            false
        }
    }

    /// The up-to-`n` known contacts closest to `target`, strictly ascending
    /// by XOR distance.
    ///
    /// Buckets are visited nearest range first; every member of a farther
    /// range is farther than every member of a nearer one, so accumulation
    /// stops as soon as `n` candidates are in hand.
    pub fn closest_to(&self, target: &NodeId, n: usize) -> Vec<Contact> {
        if n == 0 {
            return Vec::new();
        }

        let mut order: Vec<usize> = (0..self.buckets.len()).collect();
        order.sort_by(|&a, &b| {
            distance_cmp(
                &self.buckets[a].prefix_distance(target),
                &self.buckets[b].prefix_distance(target),
            )
        });

        let mut found = Vec::new();
        for idx in order {
            found.extend_from_slice(&self.buckets[idx].contacts);
            if found.len() >= n {
                break;
            }
        }

        found.sort_by(|a, b| {
            distance_cmp(&a.id.xor_distance(target), &b.id.xor_distance(target))
        });
        found.truncate(n);
        found
    }
}
