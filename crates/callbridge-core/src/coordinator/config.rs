/// Runtime options for a [`CallCoordinator`](super::CallCoordinator)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Capacity of the broadcast event channel
    pub event_buffer_capacity: usize,
    /// Hold events until the host takes them with `take_initial_events`
    pub buffer_events_until_listener: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            event_buffer_capacity: 256,
            buffer_events_until_listener: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_buffer_capacity(mut self, capacity: usize) -> Self {
        self.event_buffer_capacity = capacity;
        self
    }

    pub fn with_buffer_events_until_listener(mut self, buffer: bool) -> Self {
        self.buffer_events_until_listener = buffer;
        self
    }
}
