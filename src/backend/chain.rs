// Resource chain - creation order bookkeeping
//
// Every native object is registered here right after it is created,
// together with the code that releases it. Teardown walks the list
// backwards, so a resource is always released before the thing it was
// created from. If construction bails out halfway with `?`, dropping the
// chain releases whatever was already built.

use crate::error::{Error, Result};

/// Construction states, in the only order they can be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Uninitialized,
    Instance,
    DebugChannel,
    Surface,
    DeviceSelected,
    LogicalDevice,
    Swapchain,
    ImageViews,
    RenderPass,
    Pipeline,
    Framebuffers,
    CommandPool,
    CommandBuffer,
    SyncObjects,
    Ready,
    Destroyed,
}

impl Stage {
    pub const fn next(self) -> Option<Stage> {
        use Stage::*;
        Some(match self {
            Uninitialized => Instance,
            Instance => DebugChannel,
            DebugChannel => Surface,
            Surface => DeviceSelected,
            DeviceSelected => LogicalDevice,
            LogicalDevice => Swapchain,
            Swapchain => ImageViews,
            ImageViews => RenderPass,
            RenderPass => Pipeline,
            Pipeline => Framebuffers,
            Framebuffers => CommandPool,
            CommandPool => CommandBuffer,
            CommandBuffer => SyncObjects,
            SyncObjects => Ready,
            Ready => Destroyed,
            Destroyed => return None,
        })
    }
}

type Release = Box<dyn FnOnce()>;

pub struct ResourceChain {
    stage: Stage,
    releases: Vec<(Stage, Release)>,
    /// Drains the device before anything is released
    idle_barrier: Option<Box<dyn Fn()>>,
}

impl ResourceChain {
    pub fn new() -> Self {
        Self {
            stage: Stage::Uninitialized,
            releases: Vec::new(),
            idle_barrier: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Move to `to`, which must be the stage right after the current one.
    /// Used directly for stages that own nothing (device selection, ready).
    pub fn advance(&mut self, to: Stage) -> Result<()> {
        match self.stage.next() {
            Some(expected) if expected == to && to != Stage::Destroyed => {
                log::trace!("Resource chain: {:?} -> {:?}", self.stage, to);
                self.stage = to;
                Ok(())
            }
            Some(expected) => Err(Error::OutOfOrder { expected, got: to }),
            None => Err(Error::OutOfOrder {
                expected: Stage::Destroyed,
                got: to,
            }),
        }
    }

    /// Advance to `stage` and take ownership of the matching release.
    pub fn acquire<F>(&mut self, stage: Stage, release: F) -> Result<()>
    where
        F: FnOnce() + 'static,
    {
        self.advance(stage)?;
        self.releases.push((stage, Box::new(release)));
        Ok(())
    }

    pub fn set_idle_barrier<F>(&mut self, barrier: F)
    where
        F: Fn() + 'static,
    {
        self.idle_barrier = Some(Box::new(barrier));
    }

    /// Stages that own a release, in construction order
    pub fn constructed(&self) -> Vec<Stage> {
        self.releases.iter().map(|(stage, _)| *stage).collect()
    }

    /// Release everything in reverse order. Only the first call does work;
    /// returns the stages in the order they were released.
    pub fn teardown(&mut self) -> Vec<Stage> {
        if self.stage == Stage::Destroyed {
            return Vec::new();
        }

        if let Some(barrier) = self.idle_barrier.take() {
            barrier();
        }

        let mut order = Vec::with_capacity(self.releases.len());
        while let Some((stage, release)) = self.releases.pop() {
            log::debug!("Releasing {:?}", stage);
            release();
            order.push(stage);
        }

        self.stage = Stage::Destroyed;
        order
    }
}

impl Default for ResourceChain {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ResourceChain {
    fn drop(&mut self) {
        if self.stage != Stage::Destroyed {
            if self.stage != Stage::Ready {
                log::warn!("Unwinding partially built resource chain at {:?}", self.stage);
            }
            self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    fn record(log: &Log, what: impl Into<String>) -> impl FnOnce() + 'static {
        let log = log.clone();
        let what = what.into();
        move || log.borrow_mut().push(what)
    }

    fn build_until(chain: &mut ResourceChain, log: &Log, last: Stage) -> Result<()> {
        let mut stage = chain.stage();
        while stage != last {
            stage = stage.next().unwrap();
            if stage == Stage::DeviceSelected || stage == Stage::Ready {
                chain.advance(stage)?;
            } else {
                chain.acquire(stage, record(log, format!("{:?}", stage)))?;
            }
        }
        Ok(())
    }

    #[test]
    fn teardown_is_reverse_of_construction() {
        let log = Log::default();
        let mut chain = ResourceChain::new();
        build_until(&mut chain, &log, Stage::Ready).unwrap();

        let built = chain.constructed();
        assert_eq!(built.first(), Some(&Stage::Instance));
        assert_eq!(built.last(), Some(&Stage::SyncObjects));
        assert!(!built.contains(&Stage::DeviceSelected));

        let released = chain.teardown();
        let mut expected = built.clone();
        expected.reverse();
        assert_eq!(released, expected);

        let names: Vec<String> = expected.iter().map(|s| format!("{:?}", s)).collect();
        assert_eq!(*log.borrow(), names);
        assert_eq!(chain.stage(), Stage::Destroyed);
    }

    #[test]
    fn teardown_runs_once() {
        let log = Log::default();
        let mut chain = ResourceChain::new();
        build_until(&mut chain, &log, Stage::Ready).unwrap();

        assert!(!chain.teardown().is_empty());
        assert!(chain.teardown().is_empty());
        drop(chain);
        assert_eq!(log.borrow().len(), 12);
    }

    #[test]
    fn dropping_partial_chain_unwinds() {
        let log = Log::default();
        {
            let mut chain = ResourceChain::new();
            build_until(&mut chain, &log, Stage::RenderPass).unwrap();
        }
        assert_eq!(
            *log.borrow(),
            vec![
                "RenderPass",
                "ImageViews",
                "Swapchain",
                "LogicalDevice",
                "Surface",
                "DebugChannel",
                "Instance",
            ]
        );
    }

    #[test]
    fn idle_barrier_runs_before_any_release() {
        let log = Log::default();
        let mut chain = ResourceChain::new();
        build_until(&mut chain, &log, Stage::LogicalDevice).unwrap();
        let barrier_log = log.clone();
        chain.set_idle_barrier(move || barrier_log.borrow_mut().push("idle".into()));
        build_until(&mut chain, &log, Stage::Swapchain).unwrap();

        chain.teardown();
        assert_eq!(log.borrow()[0], "idle");
        assert_eq!(log.borrow()[1], "Swapchain");
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        let log = Log::default();
        let mut chain = ResourceChain::new();
        chain.acquire(Stage::Instance, record(&log, "instance")).unwrap();

        let err = chain.acquire(Stage::Surface, record(&log, "surface")).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfOrder { expected: Stage::DebugChannel, got: Stage::Surface }
        ));
        // The rejected release was never registered
        assert_eq!(chain.constructed(), vec![Stage::Instance]);
    }

    #[test]
    fn cannot_advance_into_destroyed_or_past_it() {
        let mut chain = ResourceChain::new();
        assert!(chain.advance(Stage::Destroyed).is_err());
        chain.teardown();
        assert!(chain.advance(Stage::Instance).is_err());
    }
}
