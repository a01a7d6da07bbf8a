//! Acknowledgment Policy.
//!
//! Pure decision table, evaluated once per message:
//!
//! | Outcome | Disposition |
//! |---|---|
//! | success | double ack |
//! | internal, redeliveries left | nak with [`NAK_DELAY`] |
//! | internal, final permitted delivery | terminate |
//! | validation / conflict / not-found / permission-denied | ack |
//!
//! Only internal failures can be caused by a transient condition, so only they
//! are handed back to the broker for redelivery.

use std::time::Duration;

use auction_product_core::ErrorKind;
use auction_product_events::Disposition;

/// Delay before a negatively acknowledged message is redelivered.
pub const NAK_DELAY: Duration = Duration::from_secs(3);

pub fn decide(outcome: Option<ErrorKind>, delivered: u64, max_deliver: u64) -> Disposition {
    match outcome {
        None => Disposition::DoubleAck,
        Some(ErrorKind::Internal) if is_exhausted(delivered, max_deliver) => {
            Disposition::Terminate
        }
        Some(ErrorKind::Internal) => Disposition::NakWithDelay(NAK_DELAY),
        Some(
            ErrorKind::Validation
            | ErrorKind::Conflict
            | ErrorKind::NotFound
            | ErrorKind::PermissionDenied,
        ) => Disposition::Ack,
    }
}

/// The broker will not hand this message out again after a nak.
pub fn is_exhausted(delivered: u64, max_deliver: u64) -> bool {
    max_deliver > 0 && delivered >= max_deliver
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn success_is_double_acked() {
        assert_eq!(decide(None, 1, 2), Disposition::DoubleAck);
    }

    #[test]
    fn internal_is_redelivered_until_the_last_attempt() {
        assert_eq!(
            decide(Some(ErrorKind::Internal), 1, 2),
            Disposition::NakWithDelay(NAK_DELAY)
        );
        assert_eq!(decide(Some(ErrorKind::Internal), 2, 2), Disposition::Terminate);
    }

    #[test]
    fn permanent_errors_are_acked() {
        for kind in [
            ErrorKind::Validation,
            ErrorKind::Conflict,
            ErrorKind::NotFound,
            ErrorKind::PermissionDenied,
        ] {
            assert_eq!(decide(Some(kind), 1, 2), Disposition::Ack, "{kind}");
        }
    }

    #[test]
    fn unlimited_redelivery_never_terminates() {
        assert_eq!(
            decide(Some(ErrorKind::Internal), 1_000, 0),
            Disposition::NakWithDelay(NAK_DELAY)
        );
    }

    fn any_outcome() -> impl Strategy<Value = Option<ErrorKind>> {
        prop_oneof![Just(None), proptest::sample::select(ErrorKind::ALL.to_vec()).prop_map(Some)]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            .. ProptestConfig::default()
        })]

        #[test]
        fn table_is_total_and_redelivers_only_internal(
            outcome in any_outcome(),
            delivered in 1u64..10,
            max_deliver in 0u64..10,
        ) {
            let disposition = decide(outcome, delivered, max_deliver);

            if disposition.redelivers() {
                prop_assert_eq!(outcome, Some(ErrorKind::Internal));
            }
            match outcome {
                None => prop_assert_eq!(disposition, Disposition::DoubleAck),
                Some(kind) if kind.is_permanent() => prop_assert_eq!(disposition, Disposition::Ack),
                Some(_) => prop_assert!(matches!(
                    disposition,
                    Disposition::NakWithDelay(_) | Disposition::Terminate
                )),
            }
        }
    }
}
