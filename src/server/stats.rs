//! BIND8-style statistics counters, shared by all workers and dumped as
//! NSTATS/XSTATS log lines on demand or on the periodic timer.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::rfc1035::{OpCode, RRType, ResponseCode};

pub struct ServerStats {
    pub boot: u64,
    pub qudp: AtomicU64,
    pub qudp6: AtomicU64,
    pub ctcp: AtomicU64,
    pub ctcp6: AtomicU64,
    pub dropped: AtomicU64,
    pub txerr: AtomicU64,
    pub truncated: AtomicU64,
    pub wrongzone: AtomicU64,
    // answers given without the AA bit (referrals)
    pub nona: AtomicU64,
    pub raxfr: AtomicU64,
    qtype: Vec<AtomicU64>,
    opcode: Vec<AtomicU64>,
    rcode: Vec<AtomicU64>,
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Default for ServerStats {
    fn default() -> Self {
        ServerStats {
            boot: now_secs(),
            qudp: AtomicU64::new(0),
            qudp6: AtomicU64::new(0),
            ctcp: AtomicU64::new(0),
            ctcp6: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            txerr: AtomicU64::new(0),
            truncated: AtomicU64::new(0),
            wrongzone: AtomicU64::new(0),
            nona: AtomicU64::new(0),
            raxfr: AtomicU64::new(0),
            qtype: (0..256).map(|_| AtomicU64::new(0)).collect(),
            opcode: (0..16).map(|_| AtomicU64::new(0)).collect(),
            rcode: (0..24).map(|_| AtomicU64::new(0)).collect(),
        }
    }
}

impl ServerStats {
    pub fn count_qtype(&self, rtype: RRType) {
        if let Some(counter) = self.qtype.get(rtype.0 as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn count_opcode(&self, opcode: OpCode) {
        self.opcode[opcode as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_rcode(&self, rcode: ResponseCode) {
        if let Some(counter) = self.rcode.get(rcode as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn rcode_value(&self, rcode: ResponseCode) -> u64 {
        self.rcode
            .get(rcode as usize)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Log the counters, one NSTATS line with the per-qtype counts and one
    /// XSTATS line with the totals.
    pub fn dump(&self) {
        let now = now_secs();

        let mut nstats = format!("NSTATS {} {}", now, self.boot);
        for (value, counter) in self.qtype.iter().enumerate() {
            let count = counter.load(Ordering::Relaxed);
            if count != 0 {
                nstats.push_str(&format!(" {}={}", RRType(value as u16), count));
            }
        }
        log::info!("{}", nstats);

        log::info!(
            "XSTATS {} {} RAXFR={} SAns={} RQ={} RIQ={} RNotify={} RUpd={} \
             SFail={} SFErr={} SNXD={} SNaAns={} RTCP={} RUDP={} RUDP6={} \
             Drop={} TxErr={} Trunc={} WrongZone={}",
            now,
            self.boot,
            self.raxfr.load(Ordering::Relaxed),
            (self.qudp.load(Ordering::Relaxed) + self.qudp6.load(Ordering::Relaxed))
                .saturating_sub(self.dropped.load(Ordering::Relaxed)),
            self.opcode[OpCode::Query as usize].load(Ordering::Relaxed),
            self.opcode[OpCode::IQuery as usize].load(Ordering::Relaxed),
            self.opcode[OpCode::Notify as usize].load(Ordering::Relaxed),
            self.opcode[OpCode::Update as usize].load(Ordering::Relaxed),
            self.rcode_value(ResponseCode::ServFail),
            self.rcode_value(ResponseCode::FormErr),
            self.rcode_value(ResponseCode::NXDomain),
            self.nona.load(Ordering::Relaxed),
            self.ctcp.load(Ordering::Relaxed) + self.ctcp6.load(Ordering::Relaxed),
            self.qudp.load(Ordering::Relaxed),
            self.qudp6.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
            self.txerr.load(Ordering::Relaxed),
            self.truncated.load(Ordering::Relaxed),
            self.wrongzone.load(Ordering::Relaxed),
        );
    }
}
