use log::error;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    OsSigInt,
    OsSigQuit,
    OsSigTerm,
    UserInt,
}

#[derive(Debug, Clone)]
pub struct Terminator {
    interrupt_tx: broadcast::Sender<Interrupted>,
}

impl Terminator {
    #[must_use]
    pub const fn new(interrupt_tx: broadcast::Sender<Interrupted>) -> Self {
        Self { interrupt_tx }
    }

    /// Tell the session (and anything else listening) to shut down.
    ///
    /// # Errors
    ///
    /// Fails if nothing is listening anymore.
    pub fn terminate(
        &mut self,
        interrupted: Interrupted,
    ) -> Result<(), broadcast::error::SendError<Interrupted>> {
        self.interrupt_tx.send(interrupted)?;

        Ok(())
    }

    /// Listen for interrupts, in addition to the receiver returned by [`create_termination`].
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Interrupted> {
        self.interrupt_tx.subscribe()
    }
}

#[cfg(unix)]
async fn terminate_by_signal(mut terminator: Terminator) {
    let signals = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
    );
    let (Ok(mut interrupt_signal), Ok(mut term_signal), Ok(mut quit_signal)) = signals else {
        error!("Failed to install signal handlers");
        return;
    };

    let interrupted = tokio::select! {
        _ = interrupt_signal.recv() => Interrupted::OsSigInt,
        _ = term_signal.recv() => Interrupted::OsSigTerm,
        _ = quit_signal.recv() => Interrupted::OsSigQuit,
    };

    if let Err(e) = terminator.terminate(interrupted) {
        error!("Failed to forward {interrupted:?}: {e}");
    }
}

#[cfg(not(unix))]
async fn terminate_by_signal(mut terminator: Terminator) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {e}");
        return;
    }
    if let Err(e) = terminator.terminate(Interrupted::OsSigInt) {
        error!("Failed to forward ctrl-c: {e}");
    }
}

// create a broadcast channel for retrieving the application kill signal
#[allow(clippy::module_name_repetitions)]
#[must_use]
pub fn create_termination() -> (Terminator, broadcast::Receiver<Interrupted>) {
    let (tx, rx) = broadcast::channel(1);
    let terminator = Terminator::new(tx);

    tokio::spawn(terminate_by_signal(terminator.clone()));

    (terminator, rx)
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[tokio::test]
    async fn test_terminate() {
        let (mut terminator, mut rx) = create_termination();

        terminator.terminate(Interrupted::UserInt).unwrap();

        assert_eq!(rx.recv().await, Ok(Interrupted::UserInt));
    }

    #[rstest]
    #[timeout(Duration::from_secs(1))]
    #[tokio::test]
    async fn test_subscribers_see_interrupts() {
        let (mut terminator, mut rx) = create_termination();
        let mut other = terminator.subscribe();

        terminator.terminate(Interrupted::OsSigTerm).unwrap();

        assert_eq!(rx.recv().await, Ok(Interrupted::OsSigTerm));
        assert_eq!(other.recv().await, Ok(Interrupted::OsSigTerm));
    }

    #[test]
    fn test_terminate_without_listeners() {
        let (tx, rx) = broadcast::channel(1);
        drop(rx);
        let mut terminator = Terminator::new(tx);
        assert!(terminator.terminate(Interrupted::OsSigTerm).is_err());
    }
}
