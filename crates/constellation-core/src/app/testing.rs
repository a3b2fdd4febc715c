//! Activities shared by the app-layer tests.

use serde::{Deserialize, Serialize};

use crate::domain::{ActivityContext, Event, Step};
use crate::error::ActivityError;
use crate::typed::{Activity, ActivityCx};

pub(crate) fn ctx(name: &str, rank: i64) -> ActivityContext {
    ActivityContext::new(name, rank).unwrap()
}

pub(crate) fn fib(n: u64) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        (a, b) = (b, a + b);
    }
    a
}

/// Finishes in `initialize`.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Leaf {
    pub(crate) name: String,
    pub(crate) rank: i64,
}

impl Leaf {
    pub(crate) fn new(name: &str, rank: i64) -> Self {
        Self {
            name: name.to_string(),
            rank,
        }
    }
}

impl Activity for Leaf {
    const TYPE: &'static str = "test.leaf.v1";

    fn context(&self) -> ActivityContext {
        ctx(&self.name, self.rank)
    }

    fn initialize(&mut self, cx: &ActivityCx<'_>) -> Result<Step, ActivityError> {
        cx.send_to_parent(&self.rank)?;
        Ok(Step::Finish)
    }
}

/// Waits for one event and passes its data to the parent.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Echo {
    pub(crate) name: String,
}

impl Activity for Echo {
    const TYPE: &'static str = "test.echo.v1";

    fn context(&self) -> ActivityContext {
        ctx(&self.name, 0)
    }

    fn initialize(&mut self, _cx: &ActivityCx<'_>) -> Result<Step, ActivityError> {
        Ok(Step::Suspend)
    }

    fn process(&mut self, cx: &ActivityCx<'_>, event: Event) -> Result<Step, ActivityError> {
        cx.send_to_parent(&event.data)?;
        Ok(Step::Finish)
    }
}

/// Fails in `initialize`.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Failing {
    pub(crate) name: String,
}

impl Activity for Failing {
    const TYPE: &'static str = "test.failing.v1";

    fn context(&self) -> ActivityContext {
        ctx(&self.name, 0)
    }

    fn initialize(&mut self, _cx: &ActivityCx<'_>) -> Result<Step, ActivityError> {
        Err(ActivityError::new("boom"))
    }
}

/// Panics in `initialize`.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Panicking {
    pub(crate) name: String,
}

impl Activity for Panicking {
    const TYPE: &'static str = "test.panicking.v1";

    fn context(&self) -> ActivityContext {
        ctx(&self.name, 0)
    }

    fn initialize(&mut self, _cx: &ActivityCx<'_>) -> Result<Step, ActivityError> {
        panic!("activity bug")
    }
}

/// Tells its parent which executor ran it.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WhoRuns {
    pub(crate) name: String,
}

impl Activity for WhoRuns {
    const TYPE: &'static str = "test.who_runs.v1";

    fn context(&self) -> ActivityContext {
        ctx(&self.name, 0)
    }

    fn initialize(&mut self, cx: &ActivityCx<'_>) -> Result<Step, ActivityError> {
        cx.send_to_parent(&cx.executor().to_string())?;
        Ok(Step::Finish)
    }
}

/// Suspends although it never expects an event.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct NeverWaits {
    pub(crate) name: String,
}

impl Activity for NeverWaits {
    const TYPE: &'static str = "test.never_waits.v1";

    fn context(&self) -> ActivityContext {
        ctx(&self.name, 0)
    }

    fn expects_events(&self) -> bool {
        false
    }

    fn initialize(&mut self, _cx: &ActivityCx<'_>) -> Result<Step, ActivityError> {
        Ok(Step::Suspend)
    }
}

/// Divide and conquer Fibonacci: one child per sub-problem, sum on the way up.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Fib {
    n: u64,
    pending: u32,
    sum: u64,
}

impl Fib {
    pub(crate) fn new(n: u64) -> Self {
        Self {
            n,
            pending: 0,
            sum: 0,
        }
    }
}

impl Activity for Fib {
    const TYPE: &'static str = "test.fib.v1";

    fn context(&self) -> ActivityContext {
        ctx("fib", self.n as i64)
    }

    fn initialize(&mut self, cx: &ActivityCx<'_>) -> Result<Step, ActivityError> {
        if self.n < 2 {
            cx.send_to_parent(&self.n)?;
            return Ok(Step::Finish);
        }
        cx.submit(Fib::new(self.n - 1))?;
        cx.submit(Fib::new(self.n - 2))?;
        self.pending = 2;
        Ok(Step::Suspend)
    }

    fn process(&mut self, cx: &ActivityCx<'_>, event: Event) -> Result<Step, ActivityError> {
        if let Some(error) = event.error {
            return Err(ActivityError::new(error));
        }
        self.sum += serde_json::from_value::<u64>(event.data)?;
        self.pending -= 1;
        if self.pending > 0 {
            return Ok(Step::Suspend);
        }
        cx.send_to_parent(&self.sum)?;
        Ok(Step::Finish)
    }
}

/// Submits `width` leaves named `leaf` and sums what they send back.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FanOut {
    pub(crate) width: u32,
    pub(crate) received: u32,
    pub(crate) sum: i64,
}

impl FanOut {
    pub(crate) fn new(width: u32) -> Self {
        Self {
            width,
            received: 0,
            sum: 0,
        }
    }
}

impl Activity for FanOut {
    const TYPE: &'static str = "test.fan_out.v1";

    fn context(&self) -> ActivityContext {
        ctx("root", 0)
    }

    fn initialize(&mut self, cx: &ActivityCx<'_>) -> Result<Step, ActivityError> {
        for i in 0..self.width {
            cx.submit(Leaf::new("leaf", i64::from(i)))?;
        }
        if self.width == 0 {
            cx.send_to_parent(&0i64)?;
            return Ok(Step::Finish);
        }
        Ok(Step::Suspend)
    }

    fn process(&mut self, cx: &ActivityCx<'_>, event: Event) -> Result<Step, ActivityError> {
        self.sum += serde_json::from_value::<i64>(event.data)?;
        self.received += 1;
        if self.received < self.width {
            return Ok(Step::Suspend);
        }
        cx.send_to_parent(&self.sum)?;
        Ok(Step::Finish)
    }
}
