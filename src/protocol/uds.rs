//! UDS (ISO 14229) diagnostic server.
//!
//! # Design
//! The server is a pure request/response machine on the caller's monotonic
//! clock; transport framing (usually ISO-TP) and the wire are the caller's
//! business. Application behavior — what a data identifier reads, whether a
//! key matches a seed, what a routine does — is delegated through the
//! [UdsBackend] trait so the server only owns session, security and timing
//! state.
//!
//! Sessions other than the default expire after S3 of silence and drop the
//! security unlock with them. Three invalid keys in a row start a lockout
//! window during which every security request is answered with NRC 0x37.

use heapless::Vec;
use num_enum::IntoPrimitive;

/// Response buffer capacity; bounds the largest DID payload.
pub const UDS_BUFFER: usize = 64;

/// Longest seed or key the security exchange carries.
pub const MAX_SEED: usize = 16;

/// Diagnostic session types.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Session {
    Default = 0x01,
    Programming = 0x02,
    ExtendedDiagnostic = 0x03,
    SafetySystem = 0x04,
}

/// Negative response codes produced by the server and its backends.
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum Nrc {
    ServiceNotSupported = 0x11,
    SubFunctionNotSupported = 0x12,
    IncorrectMessageLength = 0x13,
    ConditionsNotCorrect = 0x22,
    RequestOutOfRange = 0x31,
    SecurityAccessDenied = 0x33,
    InvalidKey = 0x35,
    ExceededNumberOfAttempts = 0x36,
    RequiredTimeDelayNotExpired = 0x37,
    SubFunctionNotSupportedInActiveSession = 0x7E,
    ServiceNotSupportedInActiveSession = 0x7F,
}

/// Routine control sub-functions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RoutineOp {
    Start,
    Stop,
    RequestResults,
}

/// Application hooks behind the protocol machine.
pub trait UdsBackend {
    /// Produce the payload of a data identifier.
    fn read_did(
        &mut self,
        did: u16,
        out: &mut Vec<u8, UDS_BUFFER>,
    ) -> Result<(), Nrc>;

    /// Accept a write to a data identifier.
    fn write_did(&mut self, did: u16, data: &[u8]) -> Result<(), Nrc>;

    /// Run a routine control operation; `out` carries the status record.
    fn routine(
        &mut self,
        op: RoutineOp,
        rid: u16,
        payload: &[u8],
        out: &mut Vec<u8, UDS_BUFFER>,
    ) -> Result<(), Nrc>;

    /// Generate a seed for the requested security level.
    fn security_seed(
        &mut self,
        level: u8,
        seed: &mut Vec<u8, MAX_SEED>,
    ) -> Result<(), Nrc>;

    /// Check a key against the last generated seed.
    fn security_key_valid(&mut self, level: u8, key: &[u8]) -> bool;
}

/// Static server parameters.
#[derive(Debug, Copy, Clone)]
pub struct UdsConfig {
    /// P2 server response time, echoed in milliseconds.
    pub p2_ms: u16,
    /// Enhanced P2* response time, echoed in 10 ms units.
    pub p2_star_10ms: u16,
    /// Non-default session expiry.
    pub s3_ms: u32,
    /// Lockout duration after too many invalid keys.
    pub security_delay_ms: u32,
    /// Invalid keys tolerated before the lockout starts.
    pub max_key_attempts: u8,
}

impl Default for UdsConfig {
    fn default() -> Self {
        UdsConfig {
            p2_ms: 50,
            p2_star_10ms: 500,
            s3_ms: 5_000,
            security_delay_ms: 10_000,
            max_key_attempts: 3,
        }
    }
}

/// Service identifiers handled by the server.
mod sid {
    pub const SESSION_CONTROL: u8 = 0x10;
    pub const READ_DID: u8 = 0x22;
    pub const SECURITY_ACCESS: u8 = 0x27;
    pub const WRITE_DID: u8 = 0x2E;
    pub const ROUTINE_CONTROL: u8 = 0x31;
    pub const TESTER_PRESENT: u8 = 0x3E;
}

/// Offset of a positive response SID from its request SID.
const POSITIVE_OFFSET: u8 = 0x40;

/// The UDS server state machine.
pub struct UdsServer {
    config: UdsConfig,
    session: Session,
    security_level: u8,
    last_activity_us: u64,
    lockout_until_us: Option<u64>,
    invalid_keys: u8,
    pending_seed_level: Option<u8>,
}

impl UdsServer {
    pub fn new(config: UdsConfig) -> Self {
        UdsServer {
            config,
            session: Session::Default,
            security_level: 0,
            last_activity_us: 0,
            lockout_until_us: None,
            invalid_keys: 0,
            pending_seed_level: None,
        }
    }

    pub fn session(&self) -> Session {
        self.session
    }

    /// Granted security level; zero means locked.
    pub fn security_level(&self) -> u8 {
        self.security_level
    }

    /// Run the S3 session timer. Call on a cadence below S3.
    pub fn periodic(&mut self, now_us: u64) {
        if self.session != Session::Default
            && now_us.saturating_sub(self.last_activity_us)
                > self.config.s3_ms as u64 * 1000
        {
            log::info!("uds: s3 expiry, returning to default session");
            self.drop_to_default();
        }
    }

    /// Process one request message.
    ///
    /// # Args
    /// * `request` - The raw service request, SID first.
    /// * `now_us` - The current monotonic time.
    /// * `backend` - Application hooks for this request.
    /// * `response` - Cleared and filled with the response; left empty when
    ///   the reply is suppressed.
    pub fn process_request<B: UdsBackend>(
        &mut self,
        request: &[u8],
        now_us: u64,
        backend: &mut B,
        response: &mut Vec<u8, UDS_BUFFER>,
    ) {
        response.clear();

        // A request after silence past S3 is served in the default session.
        self.periodic(now_us);
        self.last_activity_us = now_us;

        let sid = match request.first() {
            Some(sid) => *sid,
            None => return,
        };

        let outcome = match sid {
            sid::SESSION_CONTROL => {
                self.session_control(request, response)
            }
            sid::SECURITY_ACCESS => {
                self.security_access(request, now_us, backend, response)
            }
            sid::READ_DID => read_did(request, backend, response),
            sid::WRITE_DID => self.write_did(request, backend, response),
            sid::ROUTINE_CONTROL => {
                self.routine_control(request, backend, response)
            }
            sid::TESTER_PRESENT => tester_present(request, response),
            _ => Err(Nrc::ServiceNotSupported),
        };

        if let Err(nrc) = outcome {
            response.clear();
            // Note(unwrap): three bytes always fit the response buffer.
            response
                .extend_from_slice(&[0x7F, sid, nrc.into()])
                .unwrap();
        }
    }

    fn drop_to_default(&mut self) {
        self.session = Session::Default;
        self.security_level = 0;
        self.pending_seed_level = None;
    }

    fn session_control(
        &mut self,
        request: &[u8],
        response: &mut Vec<u8, UDS_BUFFER>,
    ) -> Result<(), Nrc> {
        if request.len() != 2 {
            return Err(Nrc::IncorrectMessageLength);
        }
        let sub = request[1] & 0x7F;
        let session = match sub {
            0x01 => Session::Default,
            0x02 => Session::Programming,
            0x03 => Session::ExtendedDiagnostic,
            0x04 => Session::SafetySystem,
            _ => return Err(Nrc::SubFunctionNotSupported),
        };

        self.session = session;
        if session == Session::Default {
            self.drop_to_default();
        } else {
            // Entering any non-default session locks security again.
            self.security_level = 0;
            self.pending_seed_level = None;
        }

        let p2 = self.config.p2_ms.to_be_bytes();
        let p2_star = self.config.p2_star_10ms.to_be_bytes();
        response
            .extend_from_slice(&[
                sid::SESSION_CONTROL + POSITIVE_OFFSET,
                sub,
                p2[0],
                p2[1],
                p2_star[0],
                p2_star[1],
            ])
            .unwrap();
        Ok(())
    }

    fn security_access<B: UdsBackend>(
        &mut self,
        request: &[u8],
        now_us: u64,
        backend: &mut B,
        response: &mut Vec<u8, UDS_BUFFER>,
    ) -> Result<(), Nrc> {
        if self.session == Session::Default {
            return Err(Nrc::ServiceNotSupportedInActiveSession);
        }
        if request.len() < 2 {
            return Err(Nrc::IncorrectMessageLength);
        }
        let sub = request[1];
        if sub == 0 {
            return Err(Nrc::SubFunctionNotSupported);
        }

        if let Some(until) = self.lockout_until_us {
            if now_us < until {
                return Err(Nrc::RequiredTimeDelayNotExpired);
            }
            self.lockout_until_us = None;
            self.invalid_keys = 0;
        }

        if sub % 2 == 1 {
            // Seed request.
            let level = (sub + 1) / 2;
            let mut seed: Vec<u8, MAX_SEED> = Vec::new();
            backend.security_seed(level, &mut seed)?;
            self.pending_seed_level = Some(level);
            response
                .extend_from_slice(&[
                    sid::SECURITY_ACCESS + POSITIVE_OFFSET,
                    sub,
                ])
                .unwrap();
            response
                .extend_from_slice(&seed)
                .map_err(|_| Nrc::RequestOutOfRange)?;
            Ok(())
        } else {
            // Key submission.
            let level = sub / 2;
            if self.pending_seed_level != Some(level) {
                return Err(Nrc::ConditionsNotCorrect);
            }
            if request.len() < 3 {
                return Err(Nrc::IncorrectMessageLength);
            }
            if backend.security_key_valid(level, &request[2..]) {
                self.security_level = level;
                self.pending_seed_level = None;
                self.invalid_keys = 0;
                response
                    .extend_from_slice(&[
                        sid::SECURITY_ACCESS + POSITIVE_OFFSET,
                        sub,
                    ])
                    .unwrap();
                Ok(())
            } else {
                self.invalid_keys = self.invalid_keys.saturating_add(1);
                self.pending_seed_level = None;
                if self.invalid_keys >= self.config.max_key_attempts {
                    self.lockout_until_us = Some(
                        now_us + self.config.security_delay_ms as u64 * 1000,
                    );
                    Err(Nrc::ExceededNumberOfAttempts)
                } else {
                    Err(Nrc::InvalidKey)
                }
            }
        }
    }

    fn write_did<B: UdsBackend>(
        &mut self,
        request: &[u8],
        backend: &mut B,
        response: &mut Vec<u8, UDS_BUFFER>,
    ) -> Result<(), Nrc> {
        self.require_configuration_session()?;
        if self.security_level < 1 {
            return Err(Nrc::SecurityAccessDenied);
        }
        if request.len() < 4 {
            return Err(Nrc::IncorrectMessageLength);
        }
        let did = u16::from_be_bytes([request[1], request[2]]);
        backend.write_did(did, &request[3..])?;
        response
            .extend_from_slice(&[
                sid::WRITE_DID + POSITIVE_OFFSET,
                request[1],
                request[2],
            ])
            .unwrap();
        Ok(())
    }

    fn routine_control<B: UdsBackend>(
        &mut self,
        request: &[u8],
        backend: &mut B,
        response: &mut Vec<u8, UDS_BUFFER>,
    ) -> Result<(), Nrc> {
        self.require_configuration_session()?;
        if self.security_level < 1 {
            return Err(Nrc::SecurityAccessDenied);
        }
        if request.len() < 4 {
            return Err(Nrc::IncorrectMessageLength);
        }
        let op = match request[1] {
            0x01 => RoutineOp::Start,
            0x02 => RoutineOp::Stop,
            0x03 => RoutineOp::RequestResults,
            _ => return Err(Nrc::SubFunctionNotSupported),
        };
        let rid = u16::from_be_bytes([request[2], request[3]]);

        let mut record: Vec<u8, UDS_BUFFER> = Vec::new();
        backend.routine(op, rid, &request[4..], &mut record)?;

        response
            .extend_from_slice(&[
                sid::ROUTINE_CONTROL + POSITIVE_OFFSET,
                request[1],
                request[2],
                request[3],
            ])
            .unwrap();
        response
            .extend_from_slice(&record)
            .map_err(|_| Nrc::RequestOutOfRange)?;
        Ok(())
    }

    /// Writes and routines run only in the configuration sessions.
    fn require_configuration_session(&self) -> Result<(), Nrc> {
        match self.session {
            Session::ExtendedDiagnostic | Session::Programming => Ok(()),
            _ => Err(Nrc::ServiceNotSupportedInActiveSession),
        }
    }
}

fn read_did<B: UdsBackend>(
    request: &[u8],
    backend: &mut B,
    response: &mut Vec<u8, UDS_BUFFER>,
) -> Result<(), Nrc> {
    if request.len() != 3 {
        return Err(Nrc::IncorrectMessageLength);
    }
    let did = u16::from_be_bytes([request[1], request[2]]);
    let mut payload: Vec<u8, UDS_BUFFER> = Vec::new();
    backend.read_did(did, &mut payload)?;
    response
        .extend_from_slice(&[
            sid::READ_DID + POSITIVE_OFFSET,
            request[1],
            request[2],
        ])
        .unwrap();
    response
        .extend_from_slice(&payload)
        .map_err(|_| Nrc::RequestOutOfRange)?;
    Ok(())
}

fn tester_present(
    request: &[u8],
    response: &mut Vec<u8, UDS_BUFFER>,
) -> Result<(), Nrc> {
    if request.len() != 2 {
        return Err(Nrc::IncorrectMessageLength);
    }
    if request[1] & 0x7F != 0x00 {
        return Err(Nrc::SubFunctionNotSupported);
    }
    // Bit 7 suppresses the positive response; activity was refreshed.
    if request[1] & 0x80 == 0 {
        response
            .extend_from_slice(&[sid::TESTER_PRESENT + POSITIVE_OFFSET, 0x00])
            .unwrap();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fixed-seed backend with one DID and one routine.
    struct TestBackend {
        stored: [u8; 4],
        routine_started: bool,
    }

    impl TestBackend {
        fn new() -> Self {
            TestBackend {
                stored: [0; 4],
                routine_started: false,
            }
        }
    }

    const SEED: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

    impl UdsBackend for TestBackend {
        fn read_did(
            &mut self,
            did: u16,
            out: &mut Vec<u8, UDS_BUFFER>,
        ) -> Result<(), Nrc> {
            match did {
                0xF186 => out
                    .extend_from_slice(&self.stored)
                    .map_err(|_| Nrc::RequestOutOfRange),
                _ => Err(Nrc::RequestOutOfRange),
            }
        }

        fn write_did(&mut self, did: u16, data: &[u8]) -> Result<(), Nrc> {
            if did != 0xF186 || data.len() != 4 {
                return Err(Nrc::RequestOutOfRange);
            }
            self.stored.copy_from_slice(data);
            Ok(())
        }

        fn routine(
            &mut self,
            op: RoutineOp,
            rid: u16,
            _payload: &[u8],
            out: &mut Vec<u8, UDS_BUFFER>,
        ) -> Result<(), Nrc> {
            if rid != 0x0203 {
                return Err(Nrc::RequestOutOfRange);
            }
            match op {
                RoutineOp::Start => self.routine_started = true,
                RoutineOp::Stop => self.routine_started = false,
                RoutineOp::RequestResults => {
                    out.push(self.routine_started as u8).unwrap()
                }
            }
            Ok(())
        }

        fn security_seed(
            &mut self,
            _level: u8,
            seed: &mut Vec<u8, MAX_SEED>,
        ) -> Result<(), Nrc> {
            seed.extend_from_slice(&SEED).unwrap();
            Ok(())
        }

        fn security_key_valid(&mut self, _level: u8, key: &[u8]) -> bool {
            key.len() == 4
                && key.iter().zip(SEED.iter()).all(|(k, s)| *k == !*s)
        }
    }

    fn request(
        server: &mut UdsServer,
        backend: &mut TestBackend,
        now_us: u64,
        bytes: &[u8],
    ) -> Vec<u8, UDS_BUFFER> {
        let mut response = Vec::new();
        server.process_request(bytes, now_us, backend, &mut response);
        response
    }

    fn unlocked_server(
        backend: &mut TestBackend,
    ) -> UdsServer {
        let mut server = UdsServer::new(UdsConfig::default());
        request(&mut server, backend, 0, &[0x10, 0x03]);
        request(&mut server, backend, 0, &[0x27, 0x01]);
        let key: std::vec::Vec<u8> = SEED.iter().map(|s| !*s).collect();
        let mut msg = std::vec::Vec::from([0x27u8, 0x02]);
        msg.extend_from_slice(&key);
        request(&mut server, backend, 0, &msg);
        server
    }

    #[test]
    fn session_control_echoes_timing_parameters() {
        let mut backend = TestBackend::new();
        let mut server = UdsServer::new(UdsConfig::default());
        let response =
            request(&mut server, &mut backend, 0, &[0x10, 0x03]);
        assert_eq!(&response[..2], &[0x50, 0x03]);
        assert_eq!(&response[2..4], &50u16.to_be_bytes());
        assert_eq!(&response[4..6], &500u16.to_be_bytes());
        assert_eq!(server.session(), Session::ExtendedDiagnostic);
    }

    #[test]
    fn read_did_is_always_allowed() {
        let mut backend = TestBackend::new();
        backend.stored = [1, 2, 3, 4];
        let mut server = UdsServer::new(UdsConfig::default());
        let response =
            request(&mut server, &mut backend, 0, &[0x22, 0xF1, 0x86]);
        assert_eq!(&response[..], &[0x62, 0xF1, 0x86, 1, 2, 3, 4]);
    }

    #[test]
    fn unknown_service_gets_nrc_11() {
        let mut backend = TestBackend::new();
        let mut server = UdsServer::new(UdsConfig::default());
        let response = request(&mut server, &mut backend, 0, &[0x19, 0x02]);
        assert_eq!(&response[..], &[0x7F, 0x19, 0x11]);
    }

    #[test]
    fn seed_key_unlocks_level_one() {
        let mut backend = TestBackend::new();
        let mut server = UdsServer::new(UdsConfig::default());
        request(&mut server, &mut backend, 0, &[0x10, 0x03]);

        let response = request(&mut server, &mut backend, 0, &[0x27, 0x01]);
        assert_eq!(&response[..2], &[0x67, 0x01]);
        assert_eq!(&response[2..], &SEED);

        let key = [0x27, 0x02, !0xDE, !0xAD, !0xBE, !0xEF];
        let response = request(&mut server, &mut backend, 1, &key);
        assert_eq!(&response[..], &[0x67, 0x02]);
        assert_eq!(server.security_level(), 1);
    }

    #[test]
    fn security_access_needs_a_non_default_session() {
        let mut backend = TestBackend::new();
        let mut server = UdsServer::new(UdsConfig::default());
        let response = request(&mut server, &mut backend, 0, &[0x27, 0x01]);
        assert_eq!(&response[..], &[0x7F, 0x27, 0x7F]);
    }

    #[test]
    fn key_without_seed_is_conditions_not_correct() {
        let mut backend = TestBackend::new();
        let mut server = UdsServer::new(UdsConfig::default());
        request(&mut server, &mut backend, 0, &[0x10, 0x03]);
        let response =
            request(&mut server, &mut backend, 0, &[0x27, 0x02, 0, 0, 0, 0]);
        assert_eq!(&response[..], &[0x7F, 0x27, 0x22]);
    }

    #[test]
    fn three_bad_keys_start_the_lockout() {
        let mut backend = TestBackend::new();
        let mut server = UdsServer::new(UdsConfig::default());
        request(&mut server, &mut backend, 0, &[0x10, 0x03]);

        for attempt in 0..2u64 {
            request(&mut server, &mut backend, attempt, &[0x27, 0x01]);
            let response = request(
                &mut server,
                &mut backend,
                attempt,
                &[0x27, 0x02, 0, 0, 0, 0],
            );
            assert_eq!(response[2], 0x35);
        }
        request(&mut server, &mut backend, 2, &[0x27, 0x01]);
        let response =
            request(&mut server, &mut backend, 2, &[0x27, 0x02, 0, 0, 0, 0]);
        assert_eq!(response[2], 0x36);

        // Every security request during the lockout is refused with 0x37.
        let response =
            request(&mut server, &mut backend, 5_000_000, &[0x27, 0x01]);
        assert_eq!(&response[..], &[0x7F, 0x27, 0x37]);

        // After the delay (and re-entering the session, which S3 dropped in
        // the meantime) the exchange works again.
        request(&mut server, &mut backend, 11_000_000, &[0x10, 0x03]);
        let response =
            request(&mut server, &mut backend, 12_000_000, &[0x27, 0x01]);
        assert_eq!(&response[..2], &[0x67, 0x01]);
    }

    #[test]
    fn write_did_requires_session_and_security() {
        let mut backend = TestBackend::new();
        let mut server = UdsServer::new(UdsConfig::default());

        // Default session: not supported in active session.
        let response = request(
            &mut server,
            &mut backend,
            0,
            &[0x2E, 0xF1, 0x86, 9, 9, 9, 9],
        );
        assert_eq!(&response[..], &[0x7F, 0x2E, 0x7F]);

        // Extended but locked: security access denied.
        request(&mut server, &mut backend, 0, &[0x10, 0x03]);
        let response = request(
            &mut server,
            &mut backend,
            0,
            &[0x2E, 0xF1, 0x86, 9, 9, 9, 9],
        );
        assert_eq!(&response[..], &[0x7F, 0x2E, 0x33]);

        // Unlocked: the write lands and echoes the DID only.
        let mut server = unlocked_server(&mut backend);
        let response = request(
            &mut server,
            &mut backend,
            10,
            &[0x2E, 0xF1, 0x86, 9, 8, 7, 6],
        );
        assert_eq!(&response[..], &[0x6E, 0xF1, 0x86]);
        assert_eq!(backend.stored, [9, 8, 7, 6]);
    }

    #[test]
    fn routine_control_round_trip() {
        let mut backend = TestBackend::new();
        let mut server = unlocked_server(&mut backend);

        let response =
            request(&mut server, &mut backend, 10, &[0x31, 0x01, 0x02, 0x03]);
        assert_eq!(&response[..], &[0x71, 0x01, 0x02, 0x03]);
        assert!(backend.routine_started);

        let response =
            request(&mut server, &mut backend, 11, &[0x31, 0x03, 0x02, 0x03]);
        assert_eq!(&response[..], &[0x71, 0x03, 0x02, 0x03, 1]);

        let response =
            request(&mut server, &mut backend, 12, &[0x31, 0x02, 0x02, 0x03]);
        assert_eq!(&response[..], &[0x71, 0x02, 0x02, 0x03]);
        assert!(!backend.routine_started);
    }

    #[test]
    fn tester_present_suppression_still_refreshes_s3() {
        let mut backend = TestBackend::new();
        let mut server = UdsServer::new(UdsConfig::default());
        request(&mut server, &mut backend, 0, &[0x10, 0x03]);

        // Suppressed positive response: empty, but activity refreshed.
        let response =
            request(&mut server, &mut backend, 4_000_000, &[0x3E, 0x80]);
        assert!(response.is_empty());

        server.periodic(8_000_000);
        assert_eq!(server.session(), Session::ExtendedDiagnostic);

        let response =
            request(&mut server, &mut backend, 8_500_000, &[0x3E, 0x00]);
        assert_eq!(&response[..], &[0x7E, 0x00]);
    }

    #[test]
    fn s3_expiry_drops_session_and_security() {
        let mut backend = TestBackend::new();
        let mut server = unlocked_server(&mut backend);
        assert_eq!(server.security_level(), 1);

        server.periodic(6_000_000);
        assert_eq!(server.session(), Session::Default);
        assert_eq!(server.security_level(), 0);

        // The next write request is processed as default session.
        let response = request(
            &mut server,
            &mut backend,
            6_100_000,
            &[0x2E, 0xF1, 0x86, 1, 1, 1, 1],
        );
        assert_eq!(&response[..], &[0x7F, 0x2E, 0x7F]);
    }

    #[test]
    fn malformed_lengths_get_nrc_13() {
        let mut backend = TestBackend::new();
        let mut server = UdsServer::new(UdsConfig::default());
        for bad in [&[0x10u8][..], &[0x22, 0xF1][..], &[0x3E][..]] {
            let response = request(&mut server, &mut backend, 0, bad);
            assert_eq!(response[2], 0x13);
        }
    }

    #[test]
    fn re_entering_a_session_locks_security_again() {
        let mut backend = TestBackend::new();
        let mut server = unlocked_server(&mut backend);
        assert_eq!(server.security_level(), 1);
        request(&mut server, &mut backend, 20, &[0x10, 0x03]);
        assert_eq!(server.security_level(), 0);
    }
}
