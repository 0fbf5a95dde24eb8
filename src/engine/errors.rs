use thiserror::Error;

/// Why an operation was rejected. Rejections never mutate state and
/// never emit events; the `Display` text is what the client sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("it is not your turn")]
    NotCurrentPlayer,
    #[error("that action is not valid in the current phase")]
    WrongPhase,
    #[error("the game has already started")]
    AlreadyStarted,
    #[error("need at least 2 players")]
    NotEnoughPlayers,
    #[error("room is full")]
    RoomFull,
    #[error("unknown player")]
    UnknownPlayer,
    #[error("position out of range")]
    PositionOutOfRange,
    #[error("expected {expected} initial flips, got {got}")]
    WrongFlipCount { expected: usize, got: usize },
    #[error("initial flip positions must be distinct")]
    DuplicatePosition,
    #[error("that card is already face up")]
    CardAlreadyFaceUp,
    #[error("initial flips already completed")]
    AlreadyFlipped,
    #[error("a card has already been drawn")]
    AlreadyDrawn,
    #[error("no card has been drawn")]
    NothingDrawn,
    #[error("the discard pile is empty")]
    DiscardPileEmpty,
    #[error("a card taken from the discard pile must be swapped")]
    MustSwapDiscardDraw,
    #[error("only a discard-pile draw can be cancelled")]
    NothingToCancel,
    #[error("a flip is required before the turn can end")]
    FlipRequired,
    #[error("no flip is pending")]
    NoFlipPending,
    #[error("the flip is not optional right now")]
    FlipNotOptional,
    #[error("someone has already gone out this round")]
    FinisherAlreadySet,
}
