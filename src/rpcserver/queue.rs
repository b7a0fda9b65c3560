use {
    log::trace,
    std::collections::VecDeque,
    tokio::sync::mpsc::{self, error::TrySendError},
    tokio_util::sync::CancellationToken,
};

/// Manages a queue of items, reading from `input` and sending the oldest
/// unsent to `output`.  The input send is decoupled from the output receive
/// by an internal unbounded queue, so producers are never blocked by a slow
/// consumer.  The handler stops when either the `input` channel is closed or
/// `quit` is cancelled, and drops `output` before returning without waiting
/// to send any items still remaining in the queue.
pub(crate) async fn queue_handler<T: Send>(
    mut input: mpsc::Receiver<T>,
    output: mpsc::Sender<T>,
    quit: CancellationToken,
) {
    let mut queue: VecDeque<T> = VecDeque::new();

    'out: loop {
        if queue.is_empty() {
            tokio::select! {
                item = input.recv() => {
                    let item = match item {
                        Some(item) => item,

                        // Sender closed the input channel.
                        None => break 'out,
                    };

                    // Either send to the output immediately if the consumer
                    // is ready, or append to the queue and send later.
                    match output.try_send(item) {
                        Ok(_) => {}
                        Err(TrySendError::Full(item)) => queue.push_back(item),
                        Err(TrySendError::Closed(_)) => break 'out,
                    }
                }

                _ = quit.cancelled() => break 'out,
            }
        } else {
            tokio::select! {
                item = input.recv() => {
                    match item {
                        Some(item) => queue.push_back(item),

                        None => break 'out,
                    }
                }

                permit = output.reserve() => {
                    match permit {
                        Ok(permit) => {
                            // The queue is known non-empty on this branch.
                            if let Some(item) = queue.pop_front() {
                                permit.send(item);
                            }
                        }

                        // Receiver gone.
                        Err(_) => break 'out,
                    }
                }

                _ = quit.cancelled() => break 'out,
            }
        }
    }

    if !queue.is_empty() {
        trace!("Queue handler exiting with {} unsent items", queue.len());
    }
}
