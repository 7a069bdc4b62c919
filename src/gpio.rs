//! GPIO handle and per-pin facade
//!
//! `Gpio` is obtained once and cloned wherever pins are needed. It composes
//! the pin controller, the open-pin registry and the lazily constructed
//! edge event source.
//!
//! ```no_run
//! use rpi_gpio::{Edge, Gpio, PinMode};
//! use std::time::Duration;
//!
//! # fn main() -> rpi_gpio::GpioResult<()> {
//! let gpio = Gpio::open()?;
//! let button = gpio.pin(17)?;
//! button.set_mode(PinMode::InputPullUp)?;
//! if button.wait_for_edge(Edge::Falling, Some(Duration::from_secs(5)))? {
//!     println!("pressed");
//! }
//! # Ok(())
//! # }
//! ```

use log::{debug, warn};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GpioConfig;
use crate::error::{GpioError, GpioResult};
use crate::events::{
    CallbackId, CancelToken, Edge, EdgeCallback, EdgeEvent, EdgeMask, InterruptSource, WaitResult,
};
use crate::hal::{ChipRevision, MemoryDevice, PeripheralAddress, RegisterAccess, RegisterMap};
use crate::pins::{self, PinController, PinMode, PinRegistry, PinState};
use crate::timer::{self, Stopwatch};

struct Shared {
    config: GpioConfig,
    controller: PinController,
    registry: PinRegistry,
    events: OnceCell<Arc<InterruptSource>>,
    map: Option<Arc<RegisterMap>>,
}

/// Handle to the GPIO block
#[derive(Clone)]
pub struct Gpio {
    inner: Arc<Shared>,
}

impl fmt::Debug for Gpio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gpio")
            .field("revision", &self.revision())
            .field("open_pins", &self.inner.registry.open_pins())
            .finish()
    }
}

impl Gpio {
    /// Map the registers with the default Raspberry Pi paths
    pub fn open() -> GpioResult<Self> {
        Self::with_config(GpioConfig::default())
    }

    /// Map the registers using `config`
    ///
    /// The mapping is shared by every handle in the process.
    pub fn with_config(config: GpioConfig) -> GpioResult<Self> {
        let map = RegisterMap::shared(&config)?;
        let revision = map.revision();
        let registers: Arc<dyn RegisterAccess> = map.clone();
        Ok(Self::build(config, registers, revision, Some(map), None))
    }

    /// Assemble a handle over any register bank and optional event source
    pub fn from_parts(
        config: GpioConfig,
        registers: Arc<dyn RegisterAccess>,
        revision: ChipRevision,
        events: Option<InterruptSource>,
    ) -> Self {
        Self::build(config, registers, revision, None, events)
    }

    fn build(
        config: GpioConfig,
        registers: Arc<dyn RegisterAccess>,
        revision: ChipRevision,
        map: Option<Arc<RegisterMap>>,
        events: Option<InterruptSource>,
    ) -> Self {
        let settle = Duration::from_micros(config.pull_settle_us);
        let cell = OnceCell::new();
        if let Some(source) = events {
            let _ = cell.set(Arc::new(source));
        }
        Self {
            inner: Arc::new(Shared {
                controller: PinController::new(registers, revision, settle),
                registry: PinRegistry::new(),
                events: cell,
                map,
                config,
            }),
        }
    }

    pub fn revision(&self) -> ChipRevision {
        self.inner.controller.revision()
    }

    /// Device the registers were mapped from, if mapped
    pub fn memory_device(&self) -> Option<MemoryDevice> {
        self.inner.map.as_ref().map(|m| m.device())
    }

    /// Peripheral base, known only when mapped through /dev/mem
    pub fn peripheral_address(&self) -> Option<PeripheralAddress> {
        self.inner.map.as_ref().and_then(|m| m.address())
    }

    pub fn config(&self) -> &GpioConfig {
        &self.inner.config
    }

    /// The register bank, for diagnostics
    pub fn registers(&self) -> &dyn RegisterAccess {
        self.inner.controller.registers()
    }

    /// Edge event source, selected on first use
    pub fn interrupt_source(&self) -> GpioResult<&Arc<InterruptSource>> {
        self.inner
            .events
            .get_or_try_init(|| InterruptSource::select(&self.inner.config).map(Arc::new))
    }

    // ========================================================================
    // Pin lifecycle
    // ========================================================================

    /// Open a pin as a plain input; opening an open pin does nothing
    pub fn open_pin(&self, pin: u8) -> GpioResult<()> {
        PinController::validate(pin)?;
        if self.inner.registry.open(pin)? {
            self.configure_opened(pin)?;
        }
        Ok(())
    }

    fn configure_opened(&self, pin: u8) -> GpioResult<()> {
        if let Err(e) = self.inner.controller.set_mode(pin, PinMode::Input) {
            let _ = self.inner.registry.close(pin);
            return Err(e);
        }
        self.inner.registry.set_mode(pin, PinMode::Input)?;
        debug!("GPIO {} opened", pin);
        Ok(())
    }

    /// Release a pin: stop its edge session, drive it low, make it an input
    pub fn close_pin(&self, pin: u8) -> GpioResult<()> {
        let state = self.inner.registry.get(pin)?;
        if state.claimed_by_events {
            if let Some(source) = self.inner.events.get() {
                source.close_pin(pin);
            }
        }
        self.inner.controller.write(pin, false)?;
        self.inner.controller.set_mode(pin, PinMode::Input)?;
        self.inner.registry.close(pin)?;
        debug!("GPIO {} closed", pin);
        Ok(())
    }

    /// Take exclusive ownership of a pin as a `GpioPin`
    pub fn pin(&self, pin: u8) -> GpioResult<GpioPin> {
        PinController::validate(pin)?;
        self.inner.registry.acquire(pin)?;
        self.configure_opened(pin)?;
        Ok(GpioPin {
            gpio: self.clone(),
            pin,
            closed: false,
        })
    }

    /// `pin` addressed by physical header position
    pub fn header_pin(&self, header: u8) -> GpioResult<GpioPin> {
        self.pin(pins::header_to_logical(header)?)
    }

    /// Open pins with their cached state
    pub fn open_pins(&self) -> Vec<(u8, PinState)> {
        self.inner.registry.open_pins()
    }

    // ========================================================================
    // Mode and level
    // ========================================================================

    pub fn set_mode(&self, pin: u8, mode: PinMode) -> GpioResult<()> {
        let state = self.inner.registry.get(pin)?;
        if mode == PinMode::Unset {
            return Err(GpioError::UnsupportedMode { pin, mode });
        }
        if state.claimed_by_events && !mode.is_input() {
            return Err(GpioError::NotAnInput { pin, mode });
        }
        self.inner.controller.set_mode(pin, mode)?;
        self.inner.registry.set_mode(pin, mode)
    }

    pub fn mode(&self, pin: u8) -> GpioResult<PinMode> {
        Ok(self.inner.registry.get(pin)?.mode)
    }

    /// Raw 3-bit function select as the hardware reports it, open or not
    pub fn function(&self, pin: u8) -> GpioResult<u32> {
        self.inner.controller.function(pin)
    }

    pub fn read(&self, pin: u8) -> GpioResult<bool> {
        self.inner.registry.get(pin)?;
        self.inner.controller.read(pin)
    }

    /// Drive an open output pin; any other mode is refused untouched
    pub fn write(&self, pin: u8, high: bool) -> GpioResult<()> {
        let state = self.inner.registry.get(pin)?;
        if state.mode != PinMode::Output {
            return Err(GpioError::NotAnOutput {
                pin,
                mode: state.mode,
            });
        }
        self.inner.controller.write(pin, high)
    }

    /// Drive every pin in `mask` high with one write per bank
    pub fn set_mask(&self, mask: u64) {
        self.inner.controller.set_mask(mask);
    }

    /// Drive every pin in `mask` low with one write per bank
    pub fn clear_mask(&self, mask: u64) {
        self.inner.controller.clear_mask(mask);
    }

    /// Levels of all pins as a bitmask, open or not
    pub fn read_all(&self) -> u64 {
        self.inner.controller.read_all()
    }

    /// Busy-poll the level register until the pin reads `high`
    ///
    /// Returns the elapsed milliseconds, or `None` on timeout. A negative or
    /// non-finite timeout checks the level once.
    pub fn wait_level(&self, pin: u8, high: bool, timeout_ms: f64) -> GpioResult<Option<f64>> {
        self.require_input(pin)?;
        let limit = if timeout_ms.is_finite() && timeout_ms > 0.0 {
            timeout_ms
        } else {
            0.0
        };
        let watch = Stopwatch::new();
        loop {
            if self.inner.controller.read(pin)? == high {
                return Ok(Some(watch.elapsed_ms()));
            }
            if watch.elapsed_ms() >= limit {
                return Ok(None);
            }
            std::hint::spin_loop();
        }
    }

    // ========================================================================
    // Edge events
    // ========================================================================

    fn require_input(&self, pin: u8) -> GpioResult<PinState> {
        let state = self.inner.registry.get(pin)?;
        if !state.mode.is_input() {
            return Err(GpioError::NotAnInput {
                pin,
                mode: state.mode,
            });
        }
        Ok(state)
    }

    /// Open the pin's edge session if it has none yet
    fn claim_events(&self, pin: u8) -> GpioResult<Arc<InterruptSource>> {
        let state = self.require_input(pin)?;
        let source = Arc::clone(self.interrupt_source()?);
        if !state.claimed_by_events {
            source.open_pin(pin)?;
            self.inner.registry.set_claimed(pin, true)?;
        }
        Ok(source)
    }

    /// Block until an edge in `mask`, or the timeout (`None` waits forever)
    pub fn wait_for_edge(
        &self,
        pin: u8,
        mask: EdgeMask,
        timeout: Option<Duration>,
    ) -> GpioResult<WaitResult> {
        self.claim_events(pin)?.wait(pin, mask, timeout, None)
    }

    /// `wait_for_edge` that also returns once `cancel` is set
    pub fn wait_for_edge_cancellable(
        &self,
        pin: u8,
        mask: EdgeMask,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> GpioResult<WaitResult> {
        self.claim_events(pin)?.wait(pin, mask, timeout, Some(cancel))
    }

    /// Wait on tokio's blocking pool; cancellation is through `cancel`
    pub async fn wait_for_edge_async(
        &self,
        pin: u8,
        mask: EdgeMask,
        timeout: Option<Duration>,
        cancel: CancelToken,
    ) -> GpioResult<WaitResult> {
        let source = self.claim_events(pin)?;
        source.wait_async(pin, mask, timeout, cancel).await
    }

    /// Run `callback` on the pin's watcher thread for every edge in `mask`
    pub fn add_edge_callback<F>(&self, pin: u8, mask: EdgeMask, callback: F) -> GpioResult<CallbackId>
    where
        F: Fn(&EdgeEvent) + Send + Sync + 'static,
    {
        let callback: EdgeCallback = Arc::new(callback);
        self.claim_events(pin)?.add_callback(pin, mask, callback)
    }

    pub fn remove_edge_callback(&self, pin: u8, id: CallbackId) -> GpioResult<bool> {
        self.inner.registry.get(pin)?;
        match self.inner.events.get() {
            Some(source) => source.remove_callback(pin, id).or(Ok(false)),
            None => Ok(false),
        }
    }

    /// Detach every edge callback on a pin; returns how many there were
    pub fn remove_all_edge_callbacks(&self, pin: u8) -> GpioResult<usize> {
        let state = self.inner.registry.get(pin)?;
        match self.inner.events.get() {
            Some(source) if state.claimed_by_events => source.remove_all_callbacks(pin),
            _ => Ok(0),
        }
    }
}

// ============================================================================
// GpioPin
// ============================================================================

/// Exclusive handle to one pin; closes the pin when dropped
pub struct GpioPin {
    gpio: Gpio,
    pin: u8,
    closed: bool,
}

impl fmt::Debug for GpioPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpioPin")
            .field("pin", &self.pin)
            .field("mode", &self.mode().ok())
            .finish()
    }
}

impl GpioPin {
    /// BCM pin number
    pub fn number(&self) -> u8 {
        self.pin
    }

    pub fn name(&self) -> Option<&'static str> {
        pins::pin_name(self.pin)
    }

    /// Physical header position
    pub fn header(&self) -> Option<u8> {
        pins::logical_to_header(self.pin)
    }

    pub fn mode(&self) -> GpioResult<PinMode> {
        self.gpio.mode(self.pin)
    }

    pub fn set_mode(&self, mode: PinMode) -> GpioResult<()> {
        self.gpio.set_mode(self.pin, mode)
    }

    pub fn read(&self) -> GpioResult<bool> {
        self.gpio.read(self.pin)
    }

    pub fn write(&self, high: bool) -> GpioResult<()> {
        self.gpio.write(self.pin, high)
    }

    pub fn set_high(&self) -> GpioResult<()> {
        self.write(true)
    }

    pub fn set_low(&self) -> GpioResult<()> {
        self.write(false)
    }

    /// Invert the current level; returns the new level
    pub fn toggle(&self) -> GpioResult<bool> {
        let level = !self.read()?;
        self.write(level)?;
        Ok(level)
    }

    /// Drive high for `ms`, then low
    pub fn pulse(&self, ms: f64) -> GpioResult<()> {
        self.set_high()?;
        timer::wait(ms);
        self.set_low()
    }

    /// True if `edge` occurred before the timeout
    pub fn wait_for_edge(&self, edge: Edge, timeout: Option<Duration>) -> GpioResult<bool> {
        let result = self.gpio.wait_for_edge(self.pin, edge.into(), timeout)?;
        Ok(!result.timed_out)
    }

    pub async fn wait_for_edge_async(
        &self,
        edge: Edge,
        timeout: Option<Duration>,
        cancel: CancelToken,
    ) -> GpioResult<bool> {
        let result = self
            .gpio
            .wait_for_edge_async(self.pin, edge.into(), timeout, cancel)
            .await?;
        Ok(!result.timed_out)
    }

    pub fn on_rising_edge<F>(&self, callback: F) -> GpioResult<CallbackId>
    where
        F: Fn(&EdgeEvent) + Send + Sync + 'static,
    {
        self.gpio
            .add_edge_callback(self.pin, EdgeMask::RISING, callback)
    }

    pub fn on_falling_edge<F>(&self, callback: F) -> GpioResult<CallbackId>
    where
        F: Fn(&EdgeEvent) + Send + Sync + 'static,
    {
        self.gpio
            .add_edge_callback(self.pin, EdgeMask::FALLING, callback)
    }

    pub fn on_edge<F>(&self, mask: EdgeMask, callback: F) -> GpioResult<CallbackId>
    where
        F: Fn(&EdgeEvent) + Send + Sync + 'static,
    {
        self.gpio.add_edge_callback(self.pin, mask, callback)
    }

    pub fn remove_edge_callback(&self, id: CallbackId) -> GpioResult<bool> {
        self.gpio.remove_edge_callback(self.pin, id)
    }

    pub fn remove_all_edge_callbacks(&self) -> GpioResult<usize> {
        self.gpio.remove_all_edge_callbacks(self.pin)
    }

    /// See [`Gpio::wait_level`]
    pub fn wait_level(&self, high: bool, timeout_ms: f64) -> GpioResult<Option<f64>> {
        self.gpio.wait_level(self.pin, high, timeout_ms)
    }

    /// Close now, reporting errors that `Drop` would only log
    pub fn close(mut self) -> GpioResult<()> {
        self.closed = true;
        self.gpio.close_pin(self.pin)
    }
}

impl Drop for GpioPin {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.gpio.close_pin(self.pin) {
            warn!("Failed to close GPIO {}: {}", self.pin, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::simulated::SimulatedProvider;
    use crate::hal::fake::FakeRegisters;
    use crate::hal::Register;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn fake_gpio(revision: ChipRevision) -> (Arc<FakeRegisters>, SimulatedProvider, Gpio) {
        let regs = Arc::new(FakeRegisters::new());
        let provider = SimulatedProvider::new();
        let source = InterruptSource::new(Box::new(provider.clone()), 30.0);
        let mut config = GpioConfig::default();
        config.pull_settle_us = 1;
        let gpio = Gpio::from_parts(config, regs.clone(), revision, Some(source));
        (regs, provider, gpio)
    }

    const MODES: [PinMode; 4] = [
        PinMode::Input,
        PinMode::Output,
        PinMode::InputPullUp,
        PinMode::InputPullDown,
    ];

    #[test]
    fn test_set_get_mode_all_pins() {
        for revision in [ChipRevision::Legacy, ChipRevision::Direct] {
            let (_regs, _provider, gpio) = fake_gpio(revision);
            for pin in 0..pins::PIN_COUNT as u8 {
                gpio.open_pin(pin).unwrap();
                for mode in MODES {
                    gpio.set_mode(pin, mode).unwrap();
                    assert_eq!(gpio.mode(pin).unwrap(), mode);
                }
            }
        }
    }

    #[test]
    fn test_open_then_close_leaves_input_low() {
        let (regs, _provider, gpio) = fake_gpio(ChipRevision::Legacy);
        for pin in 0..pins::PIN_COUNT as u8 {
            gpio.open_pin(pin).unwrap();
            gpio.set_mode(pin, PinMode::Output).unwrap();
            gpio.write(pin, true).unwrap();
            gpio.close_pin(pin).unwrap();

            let shift = (pin as u32 % 10) * 3;
            let fsel = regs.peek(Register::FunctionSelect(pin as usize / 10));
            assert_eq!((fsel >> shift) & 0b111, 0, "pin {} not an input", pin);
            let level = regs.peek(Register::Level(0));
            assert_eq!(level & (1 << pin), 0, "pin {} still high", pin);
            assert!(matches!(gpio.mode(pin), Err(GpioError::PinNotOpen(p)) if p == pin));
        }
    }

    #[test]
    fn test_write_sets_single_bit() {
        let (regs, _provider, gpio) = fake_gpio(ChipRevision::Legacy);
        gpio.open_pin(13).unwrap();
        gpio.set_mode(13, PinMode::Output).unwrap();
        regs.clear_writes();

        gpio.write(13, true).unwrap();
        gpio.write(13, false).unwrap();
        assert_eq!(
            regs.writes(),
            vec![(Register::Set(0), 1 << 13), (Register::Clear(0), 1 << 13)]
        );
    }

    #[test]
    fn test_write_requires_output_mode() {
        let (regs, _provider, gpio) = fake_gpio(ChipRevision::Legacy);
        gpio.open_pin(12).unwrap();
        for mode in [PinMode::Input, PinMode::InputPullUp, PinMode::InputPullDown] {
            gpio.set_mode(12, mode).unwrap();
            regs.clear_writes();

            assert!(matches!(
                gpio.write(12, true),
                Err(GpioError::NotAnOutput { pin: 12, mode: m }) if m == mode
            ));
            assert!(regs.writes().is_empty());
            assert_eq!(gpio.mode(12).unwrap(), mode);
        }

        let button = gpio.pin(24).unwrap();
        assert!(matches!(
            button.set_high(),
            Err(GpioError::NotAnOutput { pin: 24, .. })
        ));
        assert!(button.toggle().is_err());
        assert_eq!(regs.peek(Register::Level(0)) & (1 << 24), 0);
    }

    #[test]
    fn test_unopened_pin_errors() {
        let (regs, _provider, gpio) = fake_gpio(ChipRevision::Legacy);
        assert!(matches!(gpio.mode(7), Err(GpioError::PinNotOpen(7))));
        assert!(matches!(gpio.read(7), Err(GpioError::PinNotOpen(7))));
        assert!(matches!(gpio.write(7, true), Err(GpioError::PinNotOpen(7))));
        assert!(matches!(gpio.close_pin(7), Err(GpioError::PinNotOpen(7))));
        assert!(matches!(gpio.open_pin(28), Err(GpioError::PinOutOfRange(28))));
        assert!(regs.writes().is_empty());
    }

    #[test]
    fn test_unset_mode_leaves_state_alone() {
        let (regs, _provider, gpio) = fake_gpio(ChipRevision::Legacy);
        gpio.open_pin(8).unwrap();
        gpio.set_mode(8, PinMode::Output).unwrap();
        regs.clear_writes();

        assert!(matches!(
            gpio.set_mode(8, PinMode::Unset),
            Err(GpioError::UnsupportedMode { pin: 8, .. })
        ));
        assert_eq!(gpio.mode(8).unwrap(), PinMode::Output);
        assert!(regs.writes().is_empty());
    }

    #[test]
    fn test_pin_handle_is_exclusive_and_closes_on_drop() {
        let (regs, _provider, gpio) = fake_gpio(ChipRevision::Legacy);
        let led = gpio.pin(18).unwrap();
        assert_eq!(led.name(), Some("BCM 18 (PWM0)"));
        assert_eq!(led.header(), Some(12));
        assert_eq!(led.mode().unwrap(), PinMode::Input);
        assert!(matches!(gpio.pin(18), Err(GpioError::PinBusy(18))));

        led.set_mode(PinMode::Output).unwrap();
        led.set_high().unwrap();
        assert!(led.read().unwrap());
        assert!(!led.toggle().unwrap());
        led.set_high().unwrap();
        drop(led);

        assert!(!gpio.inner.registry.is_open(18));
        assert_eq!(regs.peek(Register::Level(0)) & (1 << 18), 0);
        let again = gpio.pin(18).unwrap();
        again.close().unwrap();
    }

    #[test]
    fn test_header_pin() {
        let (_regs, _provider, gpio) = fake_gpio(ChipRevision::Legacy);
        let pin = gpio.header_pin(11).unwrap();
        assert_eq!(pin.number(), 17);
        assert!(matches!(
            gpio.header_pin(6),
            Err(GpioError::InvalidHeaderPin(6))
        ));
    }

    #[test]
    fn test_falling_edge_wakes_waiter() {
        let (_regs, provider, gpio) = fake_gpio(ChipRevision::Legacy);
        let button = gpio.pin(17).unwrap();
        button.set_mode(PinMode::InputPullUp).unwrap();

        // Claim the pin first so the injected edge lands in a live session.
        assert!(!button
            .wait_for_edge(Edge::Falling, Some(Duration::ZERO))
            .unwrap());

        let injector = provider.inject_after(17, Edge::Falling, 5.0);
        let watch = Stopwatch::new();
        let fired = button
            .wait_for_edge(Edge::Falling, Some(Duration::from_millis(1000)))
            .unwrap();
        let elapsed = watch.elapsed_ms();
        injector.join().unwrap();

        assert!(fired);
        assert!(elapsed >= 4.0 && elapsed < 200.0, "took {}ms", elapsed);
    }

    #[test]
    fn test_rising_edge_timeout() {
        let (_regs, _provider, gpio) = fake_gpio(ChipRevision::Legacy);
        let pin = gpio.pin(4).unwrap();
        pin.set_mode(PinMode::InputPullUp).unwrap();

        let watch = Stopwatch::new();
        let fired = pin
            .wait_for_edge(Edge::Rising, Some(Duration::from_millis(50)))
            .unwrap();
        let elapsed = watch.elapsed_ms();

        assert!(!fired);
        assert!(elapsed >= 50.0 && elapsed < 250.0, "took {}ms", elapsed);
    }

    #[test]
    fn test_events_require_input() {
        let (_regs, _provider, gpio) = fake_gpio(ChipRevision::Legacy);
        let pin = gpio.pin(20).unwrap();
        pin.set_mode(PinMode::Output).unwrap();
        assert!(matches!(
            pin.wait_for_edge(Edge::Rising, Some(Duration::ZERO)),
            Err(GpioError::NotAnInput { pin: 20, mode: PinMode::Output })
        ));
        assert!(matches!(
            pin.on_rising_edge(|_| {}),
            Err(GpioError::NotAnInput { .. })
        ));
        assert!(matches!(
            pin.wait_level(true, 1.0),
            Err(GpioError::NotAnInput { .. })
        ));
    }

    #[test]
    fn test_claimed_pin_cannot_become_output() {
        let (_regs, provider, gpio) = fake_gpio(ChipRevision::Legacy);
        let pin = gpio.pin(21).unwrap();
        pin.on_falling_edge(|_| {}).unwrap();
        pin.on_rising_edge(|_| {}).unwrap();
        assert_eq!(provider.open_count(21), 1);
        assert!(gpio.inner.registry.get(21).unwrap().claimed_by_events);

        assert!(matches!(
            pin.set_mode(PinMode::Output),
            Err(GpioError::NotAnInput { .. })
        ));
        pin.set_mode(PinMode::InputPullDown).unwrap();
    }

    #[test]
    fn test_edge_callbacks_through_pin() {
        let (_regs, provider, gpio) = fake_gpio(ChipRevision::Legacy);
        let pin = gpio.pin(27).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = pin
            .on_falling_edge(move |event| sink.lock().unwrap().push(event.edge))
            .unwrap();

        provider.inject(27, Edge::Rising);
        provider.inject(27, Edge::Falling);
        timer::wait(50.0);
        assert_eq!(*seen.lock().unwrap(), vec![Edge::Falling]);

        assert!(pin.remove_edge_callback(id).unwrap());
        assert!(!pin.remove_edge_callback(id).unwrap());
    }

    #[test]
    fn test_remove_all_edge_callbacks_through_pin() {
        let (_regs, provider, gpio) = fake_gpio(ChipRevision::Legacy);
        let pin = gpio.pin(11).unwrap();
        assert_eq!(pin.remove_all_edge_callbacks().unwrap(), 0);

        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let counter = Arc::clone(&count);
            pin.on_rising_edge(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        assert_eq!(pin.remove_all_edge_callbacks().unwrap(), 2);

        provider.inject(11, Edge::Rising);
        timer::wait(30.0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_close_releases_event_session() {
        let (_regs, provider, gpio) = fake_gpio(ChipRevision::Legacy);
        let count = Arc::new(AtomicUsize::new(0));
        {
            let pin = gpio.pin(26).unwrap();
            let counter = Arc::clone(&count);
            pin.on_rising_edge(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        let source = gpio.interrupt_source().unwrap();
        assert!(!source.is_open(26));

        provider.inject(26, Edge::Rising);
        timer::wait(30.0);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // Reopening starts a fresh session
        let pin = gpio.pin(26).unwrap();
        pin.on_rising_edge(|_| {}).unwrap();
        assert_eq!(provider.open_count(26), 2);
    }

    #[test]
    fn test_wait_level() {
        let (regs, _provider, gpio) = fake_gpio(ChipRevision::Legacy);
        let pin = gpio.pin(16).unwrap();

        assert!(pin.wait_level(true, 5.0).unwrap().is_none());

        let external = Arc::clone(&regs);
        let driver = timer::once(5.0, move || external.set_level(16, true));
        let elapsed = pin.wait_level(true, 1000.0).unwrap();
        driver.join().unwrap();
        let elapsed = elapsed.unwrap();
        assert!(elapsed >= 4.0 && elapsed < 200.0, "took {}ms", elapsed);
    }

    #[test]
    fn test_wait_level_degenerate_timeouts() {
        let (regs, _provider, gpio) = fake_gpio(ChipRevision::Legacy);
        let pin = gpio.pin(15).unwrap();

        let watch = Stopwatch::new();
        for timeout in [f64::NAN, -1.0, f64::INFINITY, 0.0] {
            assert!(pin.wait_level(true, timeout).unwrap().is_none());
        }
        assert!(watch.elapsed_ms() < 100.0);

        regs.set_level(15, true);
        assert!(pin.wait_level(true, f64::NAN).unwrap().is_some());
    }

    #[test]
    fn test_masks_through_handle() {
        let (regs, _provider, gpio) = fake_gpio(ChipRevision::Direct);
        gpio.set_mask((1 << 5) | (1 << 6));
        gpio.clear_mask(1 << 5);
        assert_eq!(gpio.read_all(), 1 << 6);
        assert_eq!(regs.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_wait_for_edge_async() {
        let (_regs, provider, gpio) = fake_gpio(ChipRevision::Legacy);
        let pin = gpio.pin(19).unwrap();
        pin.on_edge(EdgeMask::NONE, |_| {}).unwrap();

        let injector = provider.inject_after(19, Edge::Rising, 5.0);
        let fired = pin
            .wait_for_edge_async(Edge::Rising, Some(Duration::from_secs(1)), CancelToken::new())
            .await
            .unwrap();
        injector.join().unwrap();
        assert!(fired);
    }

    #[test]
    fn test_lazy_event_source_selection() {
        let dir = tempfile::tempdir().unwrap();
        let config = GpioConfig::default()
            .with_chip_path(&dir.path().join("missing-chip"))
            .with_sysfs_root(&dir.path().join("missing-sysfs"));
        let gpio = Gpio::from_parts(
            config,
            Arc::new(FakeRegisters::new()),
            ChipRevision::Legacy,
            None,
        );
        let pin = gpio.pin(2).unwrap();
        // Plain I/O never touches the event backend
        assert!(!pin.read().unwrap());
        assert!(matches!(
            pin.wait_for_edge(Edge::Rising, Some(Duration::ZERO)),
            Err(GpioError::EventBackend(_))
        ));
    }
}
