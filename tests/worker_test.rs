//! Integration tests for SlotWorker.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nano_slots::core::{MediaBuffer, SlotIndex, StopPattern, TokenId};
use nano_slots::engine::worker::DecodedToken;
use nano_slots::engine::{
    CompletionRequest, DecodeBackend, FinishReason, ReplayBackend, SlotWorker, TokenEncoder,
};
use nano_slots::scheduler::SlotScheduler;
use nano_slots::{Error, Result};

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Backend whose steps always fail.
struct FailingBackend;

impl DecodeBackend for FailingBackend {
    fn prefill(&mut self, _: SlotIndex, prompt: &[TokenId], _: &[MediaBuffer]) -> Result<usize> {
        Ok(prompt.len())
    }

    fn step(&mut self, _: SlotIndex, _: Option<TokenId>, _: usize) -> Result<DecodedToken> {
        Err(Error::Decode("device lost".to_string()))
    }
}

#[test]
fn test_end_of_sequence() {
    let scheduler = Arc::new(SlotScheduler::new(1, StopPattern::none()));
    let mut worker = SlotWorker::new(scheduler.clone(), ReplayBackend::from_text("hi"));

    let completion = worker.run(CompletionRequest::new(1, vec![1, 2, 3])).unwrap();

    assert_eq!(completion.text, "hi");
    assert_eq!(completion.tokens.len(), 2);
    assert_eq!(completion.prompt_positions, 3);
    assert_eq!(completion.finish_reason, FinishReason::EndOfSequence);
    assert_eq!(scheduler.num_busy(), 0);
    assert_eq!(scheduler.lookup(1), None);
}

#[test]
fn test_max_tokens() {
    let scheduler = Arc::new(SlotScheduler::new(1, StopPattern::none()));
    let mut worker = SlotWorker::new(scheduler, ReplayBackend::from_text("ab").repeating());

    let completion = worker
        .run(CompletionRequest::new(1, vec![1]).max_tokens(3))
        .unwrap();

    assert_eq!(completion.text, "aba");
    assert_eq!(completion.finish_reason, FinishReason::MaxTokens);
}

#[test]
fn test_stop_sequence() {
    let backend = ReplayBackend::from_text("hello ASSISTANT: never").repeating();
    let pattern = StopPattern::new(backend.encode("ASSISTANT:").unwrap());
    let scheduler = Arc::new(SlotScheduler::new(1, pattern));
    let mut worker = SlotWorker::new(scheduler.clone(), backend);

    let completion = worker
        .run(CompletionRequest::new(9, vec![1]).max_tokens(100))
        .unwrap();

    assert_eq!(completion.text, "hello ASSISTANT:");
    assert_eq!(completion.finish_reason, FinishReason::StopSequence);

    // Position reflects prompt plus generated tokens
    let slot = completion.slot;
    assert_eq!(scheduler.position(slot).unwrap(), 1 + completion.tokens.len());
}

#[test]
fn test_media_is_attached_and_counted() {
    let scheduler = Arc::new(SlotScheduler::new(1, StopPattern::none()));
    let backend = ReplayBackend::from_text("ok").with_media_positions(16);
    let mut worker = SlotWorker::new(scheduler.clone(), backend);

    let image = MediaBuffer::image(Some("frame".into()), 2, 2, vec![0; 12]).unwrap();
    let request = CompletionRequest::new(3, vec![1, 2]).media(image);
    let completion = worker.run(request).unwrap();

    assert_eq!(completion.prompt_positions, 18);
    // Media is dropped with the slot
    assert_eq!(scheduler.with_slot(0, |s| s.media().len()).unwrap(), 0);
}

#[test]
fn test_no_free_slot_is_retryable() {
    let scheduler = Arc::new(SlotScheduler::new(1, StopPattern::none()));
    scheduler.acquire(100).unwrap();
    let mut worker = SlotWorker::new(scheduler.clone(), ReplayBackend::from_text("x"));

    let err = worker.run(CompletionRequest::new(1, vec![1])).unwrap_err();
    assert!(err.is_retryable());
    // The other request's slot is untouched
    assert_eq!(scheduler.lookup(100), Some(0));
}

#[test]
fn test_run_rejects_request_that_owns_a_slot() {
    let scheduler = Arc::new(SlotScheduler::new(2, StopPattern::none()));
    let slot = scheduler.acquire(7).unwrap();
    scheduler.record_token(slot, 7, 1, "owner-text").unwrap();
    let mut worker = SlotWorker::new(scheduler.clone(), ReplayBackend::from_text("xy"));

    let err = worker.run(CompletionRequest::new(7, vec![1])).unwrap_err();
    assert!(matches!(err, Error::Conflict { request_id: 7, slot: 0 }));
    assert!(!err.is_retryable());

    // The existing claim is neither written to nor released
    assert_eq!(scheduler.lookup(7), Some(slot));
    assert_eq!(scheduler.output(slot).unwrap(), "owner-text");
    assert_eq!(scheduler.position(slot).unwrap(), 1);
    assert_eq!(scheduler.num_busy(), 1);
}

#[test]
fn test_backend_error_releases_slot() {
    let scheduler = Arc::new(SlotScheduler::new(2, StopPattern::none()));
    let mut worker = SlotWorker::new(scheduler.clone(), FailingBackend);

    let err = worker.run(CompletionRequest::new(1, vec![1])).unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
    assert_eq!(scheduler.num_busy(), 0);
    assert_eq!(scheduler.lookup(1), None);
}

#[test]
fn test_cancel_mid_generation() {
    let scheduler = Arc::new(SlotScheduler::new(1, StopPattern::none()));
    let backend = ReplayBackend::from_text("z")
        .repeating()
        .with_step_delay(Duration::from_millis(1));

    let handle = {
        let scheduler = scheduler.clone();
        thread::spawn(move || {
            let mut worker = SlotWorker::new(scheduler, backend);
            worker.run(CompletionRequest::new(5, vec![1]).max_tokens(1_000_000))
        })
    };

    wait_until(|| {
        scheduler
            .lookup(5)
            .is_some_and(|slot| scheduler.output_tokens(slot).unwrap().len() >= 3)
    });
    assert!(scheduler.cancel(5));

    let completion = handle.join().unwrap().unwrap();
    assert_eq!(completion.finish_reason, FinishReason::Aborted);
    assert!(completion.tokens.len() >= 3);
    assert_eq!(scheduler.num_busy(), 0);
}

#[test]
fn test_release_mid_generation() {
    let scheduler = Arc::new(SlotScheduler::new(1, StopPattern::none()));
    let backend = ReplayBackend::from_text("z")
        .repeating()
        .with_step_delay(Duration::from_millis(1));

    let handle = {
        let scheduler = scheduler.clone();
        thread::spawn(move || {
            let mut worker = SlotWorker::new(scheduler, backend);
            worker.run(CompletionRequest::new(5, vec![1]).max_tokens(1_000_000))
        })
    };

    wait_until(|| {
        scheduler
            .lookup(5)
            .is_some_and(|slot| scheduler.position(slot).unwrap() >= 3)
    });
    assert!(scheduler.release(5));

    // The freed slot can be handed to someone else right away
    let slot = scheduler.acquire(6).unwrap();

    let completion = handle.join().unwrap().unwrap();
    assert_eq!(completion.finish_reason, FinishReason::Aborted);
    assert_eq!(completion.slot, slot);

    // The stale worker did not write into the new owner's slot
    assert!(scheduler.output_tokens(slot).unwrap().is_empty());
    assert_eq!(scheduler.lookup(6), Some(slot));
}

#[test]
fn test_workers_share_pool() {
    const CAPACITY: usize = 3;
    const REQUESTS: u64 = 12;

    let scheduler = Arc::new(SlotScheduler::new(CAPACITY, StopPattern::none()));
    let backend = ReplayBackend::from_text("abcd").with_step_delay(Duration::from_millis(1));

    let handles: Vec<_> = (0..REQUESTS)
        .map(|id| {
            let mut worker = SlotWorker::new(scheduler.clone(), backend.clone());
            thread::spawn(move || loop {
                match worker.run(CompletionRequest::new(id, vec![1, 2])) {
                    Err(e) if e.is_retryable() => thread::sleep(Duration::from_millis(1)),
                    other => return other,
                }
            })
        })
        .collect();

    for handle in handles {
        let completion = handle.join().unwrap().unwrap();
        assert_eq!(completion.text, "abcd");
        assert!(completion.slot < CAPACITY);
    }
    assert_eq!(scheduler.num_free(), CAPACITY);
}
