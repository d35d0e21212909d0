//! Configuration types for the hosted simulator
//!
//! Separate crate so it can be used from the build.rs script

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// The longest the main loop sleeps while no messages are queued, in
    /// milliseconds. Defaults to 100ms.
    pub idle_ms: Option<u32>,

    /// The demo tasks sent messages at startup.
    pub tasks: TaskDemoConfigOverrides,

    /// The simulated UART interrupt.
    ///
    /// If this is disabled, the interrupt thread is not spawned.
    pub uart_irq: UartIrqConfigOverrides,

    /// Exit once every mailbox is empty and the demos have finished, rather
    /// than idling forever.
    #[serde(default)]
    pub exit_when_idle: bool,
}

impl PlatformConfig {
    pub const DEFAULT_IDLE_MS: u32 = 100;

    pub fn idle_ms(&self) -> u32 {
        self.idle_ms.unwrap_or(Self::DEFAULT_IDLE_MS)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskDemoConfig {
    /// Length of the zero-filled message sent last to the second task.
    pub big_message_len: u16,
}

impl TaskDemoConfig {
    const DEFAULT_BIG_MESSAGE_LEN: u16 = 100;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskDemoConfigOverrides {
    /// Should the demo tasks be registered?
    pub enabled: bool,
    /// Length of the zero-filled message sent last to the second task.
    pub big_message_len: Option<u16>,
}

impl TaskDemoConfigOverrides {
    pub fn into_settings(self) -> TaskDemoConfig {
        TaskDemoConfig {
            big_message_len: self
                .big_message_len
                .unwrap_or(TaskDemoConfig::DEFAULT_BIG_MESSAGE_LEN),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UartIrqConfig {
    /// Time between simulated interrupts, in milliseconds.
    pub period_ms: u32,
    /// Number of interrupts to raise before the line goes quiet.
    pub count: u32,
}

impl UartIrqConfig {
    const DEFAULT_PERIOD_MS: u32 = 250;
    const DEFAULT_COUNT: u32 = 8;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UartIrqConfigOverrides {
    /// Should the simulated interrupt be raised?
    pub enabled: bool,
    /// Time between simulated interrupts, in milliseconds.
    pub period_ms: Option<u32>,
    /// Number of interrupts to raise before the line goes quiet.
    pub count: Option<u32>,
}

impl UartIrqConfigOverrides {
    pub fn into_settings(self) -> UartIrqConfig {
        UartIrqConfig {
            period_ms: self.period_ms.unwrap_or(UartIrqConfig::DEFAULT_PERIOD_MS),
            count: self.count.unwrap_or(UartIrqConfig::DEFAULT_COUNT),
        }
    }
}
