//! Error types for placement and routing.
//!
//! Recoverable conditions (congestion, transient arch rejections) are handled
//! inside the subsystems and never surface here; a [`PnrError`] means the run
//! was aborted. Object names are resolved to strings at construction time so
//! errors remain meaningful without the interner. Inconsistencies that can
//! only arise from a bug (as opposed to bad input) are wrapped as
//! [`PnrError::Internal`].

use arbor_common::InternalError;

/// The result type used by placement and routing entry points.
pub type PnrResult<T> = Result<T, PnrError>;

/// An unrecoverable placement or routing failure.
#[derive(Debug, thiserror::Error)]
pub enum PnrError {
    /// A user-pinned bel name does not exist on this device.
    #[error("no bel named '{bel}' located for this device (processing pinned bel on '{cell}')")]
    UnknownPinnedBel {
        /// The cell carrying the pin constraint.
        cell: String,
        /// The missing bel name.
        bel: String,
    },

    /// A user-pinned bel has the wrong type for its cell.
    #[error("bel '{bel}' of type '{bel_type}' does not match cell '{cell}' of type '{cell_type}'")]
    PinnedBelTypeMismatch {
        /// The pinned bel name.
        bel: String,
        /// The bel's type tag.
        bel_type: String,
        /// The cell name.
        cell: String,
        /// The cell's type tag.
        cell_type: String,
    },

    /// A user-pinned bel fails the architecture's validity check.
    #[error("bel '{bel}' is not valid for cell '{cell}'")]
    PinnedBelInvalid {
        /// The pinned bel name.
        bel: String,
        /// The cell name.
        cell: String,
    },

    /// A user-pinned bel is already occupied.
    #[error("cell '{cell}' cannot be bound to bel '{bel}' since it is already bound to cell '{other}'")]
    PinnedBelOccupied {
        /// The cell that requested the bel.
        cell: String,
        /// The pinned bel name.
        bel: String,
        /// The cell already on the bel.
        other: String,
    },

    /// No legal bel could be found for a cell, even after rip-up retries.
    #[error("failed to place cell '{cell}' of type '{cell_type}'")]
    Unplaceable {
        /// The cell name.
        cell: String,
        /// The cell's type tag.
        cell_type: String,
    },

    /// A bel failed the architecture validity check after placement.
    #[error("post-placement validity check failed for bel '{bel}' ({context})")]
    PostPlacementCheck {
        /// The offending bel name.
        bel: String,
        /// The cell on that bel, or "no cell".
        context: String,
    },

    /// A region or chain constraint is still violated after placement.
    #[error("constraint satisfaction check failed for cell '{cell}' at bel '{bel}'")]
    ConstraintUnsatisfied {
        /// The cell name.
        cell: String,
        /// The bel the cell ended up on.
        bel: String,
    },

    /// A cell port has no corresponding fabric wire.
    #[error("no wire found for port '{port}' on cell '{cell}'")]
    MissingPinWire {
        /// The cell name.
        cell: String,
        /// The port name.
        port: String,
    },

    /// An arc could not be routed, even with the bounding box lifted.
    #[error("failed to route arc {arc} of net '{net}', from {from} to {to}")]
    Unroutable {
        /// The net name.
        net: String,
        /// The arc (user) index within the net.
        arc: usize,
        /// Source wire name.
        from: String,
        /// Sink wire name.
        to: String,
    },

    /// A net could not be routed by the simple router even in rip-up mode.
    #[error("net '{net}' is impossible to route")]
    UnroutableNet {
        /// The net name.
        net: String,
    },

    /// The recorded route tree for an arc does not reach its source.
    #[error("incomplete route tree for arc {arc} of net '{net}'")]
    CorruptRouteTree {
        /// The net name.
        net: String,
        /// The arc (user) index within the net.
        arc: usize,
    },

    /// An internal inconsistency in placement or routing state.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let e = PnrError::Unplaceable {
            cell: "lut_7".into(),
            cell_type: "LUT".into(),
        };
        assert_eq!(format!("{e}"), "failed to place cell 'lut_7' of type 'LUT'");

        let e = PnrError::CorruptRouteTree {
            net: "data[3]".into(),
            arc: 2,
        };
        assert!(format!("{e}").contains("arc 2 of net 'data[3]'"));
    }

    #[test]
    fn is_std_error() {
        fn assert_err<E: std::error::Error>() {}
        assert_err::<PnrError>();
    }

    #[test]
    fn internal_error_converts() {
        let e: PnrError = InternalError::new("ref count underflow").into();
        assert!(matches!(e, PnrError::Internal(_)));
        assert_eq!(format!("{e}"), "internal error: ref count underflow");
    }
}
