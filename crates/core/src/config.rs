//! Tuning configuration and the adapter the session polls.
//!
//! The RTSP session does not own tuning state. It sees the configuration
//! through the read-mostly [`TunerConfig`] trait: two "dirty bit" queries
//! ([`channel_status`](TunerConfig::channel_status),
//! [`pid_status`](TunerConfig::pid_status)) that it polls every loop
//! iteration, and two consuming queries
//! ([`setup_data`](TunerConfig::setup_data),
//! [`play_data`](TunerConfig::play_data)) that render the URL query portion
//! of the next SETUP or PLAY and clear the dirty bits in the same step.
//!
//! [`TuningStore`] is the concrete implementation: a front end (vtuner
//! ioctl handler, CLI, test) writes tuning parameters and PID lists into
//! it, and the session drains the resulting change flags.

use parking_lot::Mutex;
use std::fmt;

/// Channel-level configuration state as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Current channel is valid and unchanged.
    Stable,
    /// A new channel was configured and has not been consumed yet.
    Changed,
    /// No valid channel is configured; an active session must tear down.
    Invalid,
}

/// PID-list state as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidStatus {
    Stationary,
    Changed,
}

/// Read-only view of tuning state consumed by the RTSP session.
///
/// `setup_data` and `play_data` return the rendered query string together
/// with a flag telling the caller whether the query reflects a channel
/// change. Both clear the change flags atomically, which is what makes
/// [`ChannelStatus::Stable`] "return after the next `get_*_data`".
pub trait TunerConfig: Send + Sync {
    /// True when media arrives interleaved on the RTSP TCP connection.
    fn is_tcp_data(&self) -> bool;

    /// Kernel receive-buffer size for the media socket, in megabytes.
    fn rtp_buffer_mb(&self) -> usize;

    fn channel_status(&self) -> ChannelStatus;

    fn pid_status(&self) -> PidStatus;

    /// Query string for the next SETUP, starting with `?`.
    fn setup_data(&self) -> (String, bool);

    /// Query string for the next PLAY. Empty when nothing changed,
    /// a `?pids=` query when only the PID list changed.
    fn play_data(&self) -> (String, bool);
}

/// Signal polarisation, rendered as the `pol=` query value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarization {
    Horizontal,
    Vertical,
}

impl fmt::Display for Polarization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Horizontal => write!(f, "h"),
            Self::Vertical => write!(f, "v"),
        }
    }
}

/// DVB delivery system, rendered as the `msys=` query value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverySystem {
    Dvbs,
    Dvbs2,
}

impl fmt::Display for DeliverySystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dvbs => write!(f, "dvbs"),
            Self::Dvbs2 => write!(f, "dvbs2"),
        }
    }
}

/// Inner forward error correction, rendered in the compact `fec=` form
/// (`34` for 3/4, `56` for 5/6, and so on).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FecInner {
    F12,
    F23,
    F34,
    F56,
    F78,
    F89,
    F910,
}

impl fmt::Display for FecInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::F12 => "12",
            Self::F23 => "23",
            Self::F34 => "34",
            Self::F56 => "56",
            Self::F78 => "78",
            Self::F89 => "89",
            Self::F910 => "910",
        };
        write!(f, "{s}")
    }
}

/// One DVB-S/S2 transponder, the unit of a "channel change".
///
/// Frequencies are in MHz and symbol rates in kSym/s, matching the units
/// the SAT>IP query syntax expects on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuningParams {
    /// Signal source (DiSEqC position), 1-based.
    pub src: u8,
    /// Transponder frequency in MHz.
    pub freq_mhz: u32,
    pub pol: Polarization,
    pub msys: DeliverySystem,
    /// Symbol rate in kSym/s.
    pub sr: u32,
    /// Inner FEC; omitted from the query when `None`.
    pub fec: Option<FecInner>,
}

impl TuningParams {
    fn render(&self, query: &mut String) {
        use fmt::Write;
        let _ = write!(
            query,
            "src={}&freq={}&pol={}&msys={}&sr={}",
            self.src, self.freq_mhz, self.pol, self.msys, self.sr
        );
        if let Some(fec) = self.fec {
            let _ = write!(query, "&fec={fec}");
        }
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    params: Option<TuningParams>,
    pids: Vec<u16>,
    channel_dirty: bool,
    pid_dirty: bool,
}

/// Shared tuning store implementing [`TunerConfig`].
///
/// Writers call [`set_channel`](Self::set_channel) /
/// [`set_pids`](Self::set_pids) / [`clear_channel`](Self::clear_channel);
/// the session observes the resulting status flags and consumes them via
/// the trait. All mutation happens under one small mutex so a query and
/// its flag-clearing are a single step.
pub struct TuningStore {
    tcp_data: bool,
    rtp_buffer_mb: usize,
    inner: Mutex<StoreInner>,
}

impl TuningStore {
    pub fn new(tcp_data: bool, rtp_buffer_mb: usize) -> Self {
        Self {
            tcp_data,
            rtp_buffer_mb,
            inner: Mutex::new(StoreInner::default()),
        }
    }

    /// Configure a new channel; raises the channel dirty bit.
    pub fn set_channel(&self, params: TuningParams) {
        let mut inner = self.inner.lock();
        tracing::debug!(freq_mhz = params.freq_mhz, pol = %params.pol, "channel configured");
        inner.params = Some(params);
        inner.channel_dirty = true;
    }

    /// Drop the current channel. An active session reacts with TEARDOWN.
    pub fn clear_channel(&self) {
        let mut inner = self.inner.lock();
        inner.params = None;
        inner.channel_dirty = false;
        inner.pid_dirty = false;
    }

    /// Replace the PID list; raises the PID dirty bit.
    pub fn set_pids(&self, pids: Vec<u16>) {
        let mut inner = self.inner.lock();
        inner.pids = pids;
        inner.pid_dirty = true;
    }

    fn render_pids(pids: &[u16], query: &mut String) {
        use fmt::Write;
        if pids.is_empty() {
            query.push_str("pids=none");
            return;
        }
        query.push_str("pids=");
        for (i, pid) in pids.iter().enumerate() {
            if i > 0 {
                query.push(',');
            }
            let _ = write!(query, "{pid}");
        }
    }
}

impl TunerConfig for TuningStore {
    fn is_tcp_data(&self) -> bool {
        self.tcp_data
    }

    fn rtp_buffer_mb(&self) -> usize {
        self.rtp_buffer_mb
    }

    fn channel_status(&self) -> ChannelStatus {
        let inner = self.inner.lock();
        match (&inner.params, inner.channel_dirty) {
            (None, _) => ChannelStatus::Invalid,
            (Some(_), true) => ChannelStatus::Changed,
            (Some(_), false) => ChannelStatus::Stable,
        }
    }

    fn pid_status(&self) -> PidStatus {
        if self.inner.lock().pid_dirty {
            PidStatus::Changed
        } else {
            PidStatus::Stationary
        }
    }

    fn setup_data(&self) -> (String, bool) {
        let mut inner = self.inner.lock();
        let channel_changed = inner.channel_dirty;
        inner.channel_dirty = false;
        inner.pid_dirty = false;

        let mut query = String::from("?");
        match &inner.params {
            Some(params) => params.render(&mut query),
            None => return (String::new(), false),
        }
        query.push('&');
        Self::render_pids(&inner.pids, &mut query);
        (query, channel_changed)
    }

    fn play_data(&self) -> (String, bool) {
        let mut inner = self.inner.lock();
        let channel_changed = inner.channel_dirty;
        let pid_changed = inner.pid_dirty;
        inner.channel_dirty = false;
        inner.pid_dirty = false;

        if channel_changed {
            let mut query = String::from("?");
            match &inner.params {
                Some(params) => params.render(&mut query),
                None => return (String::new(), false),
            }
            query.push('&');
            Self::render_pids(&inner.pids, &mut query);
            (query, true)
        } else if pid_changed {
            let mut query = String::from("?");
            Self::render_pids(&inner.pids, &mut query);
            (query, false)
        } else {
            (String::new(), false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TuningParams {
        TuningParams {
            src: 1,
            freq_mhz: 11538,
            pol: Polarization::Vertical,
            msys: DeliverySystem::Dvbs,
            sr: 22000,
            fec: Some(FecInner::F56),
        }
    }

    #[test]
    fn empty_store_is_invalid() {
        let store = TuningStore::new(false, 4);
        assert_eq!(store.channel_status(), ChannelStatus::Invalid);
        assert_eq!(store.pid_status(), PidStatus::Stationary);
    }

    #[test]
    fn set_channel_raises_and_setup_consumes() {
        let store = TuningStore::new(false, 4);
        store.set_channel(params());
        store.set_pids(vec![0, 100]);
        assert_eq!(store.channel_status(), ChannelStatus::Changed);

        let (query, channel_changed) = store.setup_data();
        assert!(channel_changed);
        assert_eq!(
            query,
            "?src=1&freq=11538&pol=v&msys=dvbs&sr=22000&fec=56&pids=0,100"
        );

        assert_eq!(store.channel_status(), ChannelStatus::Stable);
        assert_eq!(store.pid_status(), PidStatus::Stationary);
    }

    #[test]
    fn pid_only_change_renders_pid_query() {
        let store = TuningStore::new(false, 4);
        store.set_channel(params());
        let _ = store.setup_data();

        store.set_pids(vec![0, 200, 300]);
        assert_eq!(store.pid_status(), PidStatus::Changed);

        let (query, channel_changed) = store.play_data();
        assert!(!channel_changed);
        assert_eq!(query, "?pids=0,200,300");
        assert_eq!(store.pid_status(), PidStatus::Stationary);
    }

    #[test]
    fn channel_change_renders_full_play_query() {
        let store = TuningStore::new(false, 4);
        store.set_channel(params());
        let _ = store.setup_data();

        store.set_channel(TuningParams {
            freq_mhz: 12000,
            pol: Polarization::Horizontal,
            fec: None,
            ..params()
        });
        store.set_pids(vec![0, 200]);

        let (query, channel_changed) = store.play_data();
        assert!(channel_changed);
        assert_eq!(query, "?src=1&freq=12000&pol=h&msys=dvbs&sr=22000&pids=0,200");
    }

    #[test]
    fn empty_pid_list_renders_none() {
        let store = TuningStore::new(false, 4);
        store.set_channel(params());
        let (query, _) = store.setup_data();
        assert!(query.ends_with("&pids=none"), "got: {query}");
    }

    #[test]
    fn clear_channel_goes_invalid() {
        let store = TuningStore::new(false, 4);
        store.set_channel(params());
        store.clear_channel();
        assert_eq!(store.channel_status(), ChannelStatus::Invalid);
        assert_eq!(store.play_data().0, "");
    }
}
