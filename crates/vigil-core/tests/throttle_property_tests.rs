//! Property tests for the throttler windows and the registration digest

use core::time::Duration;
use proptest::prelude::*;

use vigil_core::{ObjectId, RateLimit, RegistrationSummary, ThrottleOutcome, Throttler, Timestamp};

proptest! {
    /// However requests arrive, granted sends never violate either window.
    #[test]
    fn throttler_never_exceeds_its_windows(gaps in proptest::collection::vec(0u64..5_000, 1..200)) {
        let mut throttler = Throttler::new(vec![
            RateLimit::new(Duration::from_secs(1), 1),
            RateLimit::new(Duration::from_secs(60), 6),
        ]);

        let mut now = 0u64;
        let mut sends: Vec<u64> = Vec::new();
        for gap in gaps {
            now += gap;
            if let ThrottleOutcome::SendNow = throttler.attempt(Timestamp::new(now)) {
                sends.push(now);
            }
        }

        for window in sends.windows(2) {
            prop_assert!(window[1] - window[0] >= 1_000, "fine window violated: {window:?}");
        }
        for (i, &sent) in sends.iter().enumerate() {
            let in_minute = sends[..=i]
                .iter()
                .filter(|&&earlier| sent - earlier < 60_000)
                .count();
            prop_assert!(in_minute <= 6, "coarse window violated at {sent}");
        }
    }

    /// A deferral never promises a time at which the send is still refused.
    #[test]
    fn deferral_times_are_honored(gaps in proptest::collection::vec(1u64..900, 1..50)) {
        let mut throttler = Throttler::new(vec![
            RateLimit::new(Duration::from_secs(1), 1),
            RateLimit::new(Duration::from_secs(60), 6),
        ]);

        let mut now = 0u64;
        for gap in gaps {
            now += gap;
            if let ThrottleOutcome::Deferred(at) = throttler.attempt(Timestamp::new(now)) {
                prop_assert!(at.as_millis() > now);
                prop_assert_eq!(
                    throttler.attempt(at),
                    ThrottleOutcome::SendNow,
                    "deferred send refused at its promised time"
                );
                now = at.as_millis();
            }
        }
    }

    /// The digest is a pure function of the id set, not of insertion order.
    #[test]
    fn registration_digest_ignores_order(
        names in proptest::collection::hash_set("[a-z]{1,12}", 0..20),
        seed in any::<u64>(),
    ) {
        let ids: Vec<ObjectId> = names
            .iter()
            .map(|name| ObjectId::new(1, name.as_bytes().to_vec()))
            .collect();

        let mut shuffled = ids.clone();
        let mut rng = fastrand::Rng::with_seed(seed);
        rng.shuffle(&mut shuffled);

        let original = RegistrationSummary::compute(ids.iter());
        let reordered = RegistrationSummary::compute(shuffled.iter());
        prop_assert_eq!(original, reordered);
    }
}
