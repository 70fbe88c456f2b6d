//! Gearman message types and their protocol attributes.
//!
//! Each type knows its wire code, whether a request of that type expects a
//! reply, and which replies answer it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GearmanError;

/// Priority of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Gearman message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PacketType {
    CanDo = 1,
    CantDo = 2,
    ResetAbilities = 3,
    PreSleep = 4,
    Noop = 6,
    SubmitJob = 7,
    JobCreated = 8,
    GrabJob = 9,
    NoJob = 10,
    JobAssign = 11,
    WorkStatus = 12,
    WorkComplete = 13,
    WorkFail = 14,
    GetStatus = 15,
    EchoReq = 16,
    EchoRes = 17,
    SubmitJobBg = 18,
    Error = 19,
    StatusRes = 20,
    SubmitJobHigh = 21,
    SetClientId = 22,
    CanDoTimeout = 23,
    AllYours = 24,
    WorkException = 25,
    OptionReq = 26,
    OptionRes = 27,
    WorkData = 28,
    WorkWarning = 29,
    GrabJobUniq = 30,
    JobAssignUniq = 31,
    SubmitJobHighBg = 32,
    SubmitJobLow = 33,
    SubmitJobLowBg = 34,
    SubmitJobSched = 35,
    SubmitJobEpoch = 36,
}

impl PacketType {
    /// Every known type, in code order.
    pub const ALL: [PacketType; 35] = [
        PacketType::CanDo,
        PacketType::CantDo,
        PacketType::ResetAbilities,
        PacketType::PreSleep,
        PacketType::Noop,
        PacketType::SubmitJob,
        PacketType::JobCreated,
        PacketType::GrabJob,
        PacketType::NoJob,
        PacketType::JobAssign,
        PacketType::WorkStatus,
        PacketType::WorkComplete,
        PacketType::WorkFail,
        PacketType::GetStatus,
        PacketType::EchoReq,
        PacketType::EchoRes,
        PacketType::SubmitJobBg,
        PacketType::Error,
        PacketType::StatusRes,
        PacketType::SubmitJobHigh,
        PacketType::SetClientId,
        PacketType::CanDoTimeout,
        PacketType::AllYours,
        PacketType::WorkException,
        PacketType::OptionReq,
        PacketType::OptionRes,
        PacketType::WorkData,
        PacketType::WorkWarning,
        PacketType::GrabJobUniq,
        PacketType::JobAssignUniq,
        PacketType::SubmitJobHighBg,
        PacketType::SubmitJobLow,
        PacketType::SubmitJobLowBg,
        PacketType::SubmitJobSched,
        PacketType::SubmitJobEpoch,
    ];

    /// Wire code.
    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Whether a request of this type is answered by the job server.
    pub fn requires_response(self) -> bool {
        self.is_job_submission()
            || matches!(
                self,
                PacketType::GetStatus
                    | PacketType::EchoReq
                    | PacketType::GrabJob
                    | PacketType::GrabJobUniq
                    | PacketType::PreSleep
                    | PacketType::OptionReq
            )
    }

    /// Whether this is one of the SUBMIT_JOB variants.
    pub fn is_job_submission(self) -> bool {
        matches!(
            self,
            PacketType::SubmitJob
                | PacketType::SubmitJobBg
                | PacketType::SubmitJobHigh
                | PacketType::SubmitJobHighBg
                | PacketType::SubmitJobLow
                | PacketType::SubmitJobLowBg
                | PacketType::SubmitJobSched
                | PacketType::SubmitJobEpoch
        )
    }

    /// Whether this submission detaches the client from the job.
    pub fn is_background_submission(self) -> bool {
        matches!(
            self,
            PacketType::SubmitJobBg
                | PacketType::SubmitJobHighBg
                | PacketType::SubmitJobLowBg
                | PacketType::SubmitJobSched
                | PacketType::SubmitJobEpoch
        )
    }

    /// Priority encoded by a submission type.
    pub fn priority(self) -> Option<JobPriority> {
        match self {
            PacketType::SubmitJobHigh | PacketType::SubmitJobHighBg => Some(JobPriority::High),
            PacketType::SubmitJobLow | PacketType::SubmitJobLowBg => Some(JobPriority::Low),
            t if t.is_job_submission() => Some(JobPriority::Normal),
            _ => None,
        }
    }

    /// Submission type for a priority and background flag.
    pub fn submission(priority: JobPriority, background: bool) -> Self {
        match (priority, background) {
            (JobPriority::Low, false) => PacketType::SubmitJobLow,
            (JobPriority::Low, true) => PacketType::SubmitJobLowBg,
            (JobPriority::Normal, false) => PacketType::SubmitJob,
            (JobPriority::Normal, true) => PacketType::SubmitJobBg,
            (JobPriority::High, false) => PacketType::SubmitJobHigh,
            (JobPriority::High, true) => PacketType::SubmitJobHighBg,
        }
    }

    /// Whether a response of this type answers a request of type `request`.
    pub fn is_reply_to(self, request: PacketType) -> bool {
        match request {
            r if r.is_job_submission() => self == PacketType::JobCreated,
            PacketType::GetStatus => self == PacketType::StatusRes,
            PacketType::EchoReq => self == PacketType::EchoRes,
            PacketType::GrabJob | PacketType::GrabJobUniq => matches!(
                self,
                PacketType::NoJob | PacketType::JobAssign | PacketType::JobAssignUniq
            ),
            PacketType::PreSleep => self == PacketType::Noop,
            PacketType::OptionReq => self == PacketType::OptionRes,
            _ => false,
        }
    }

    /// WORK_* packets that end a job.
    pub fn is_terminal_work_update(self) -> bool {
        matches!(
            self,
            PacketType::WorkComplete | PacketType::WorkFail | PacketType::WorkException
        )
    }

    /// WORK_* packets a client routes by job handle.
    pub fn is_work_update(self) -> bool {
        self.is_terminal_work_update()
            || matches!(
                self,
                PacketType::WorkStatus | PacketType::WorkData | PacketType::WorkWarning
            )
    }

    /// Protocol name, e.g. `SUBMIT_JOB_BG`.
    pub fn name(self) -> &'static str {
        match self {
            PacketType::CanDo => "CAN_DO",
            PacketType::CantDo => "CANT_DO",
            PacketType::ResetAbilities => "RESET_ABILITIES",
            PacketType::PreSleep => "PRE_SLEEP",
            PacketType::Noop => "NOOP",
            PacketType::SubmitJob => "SUBMIT_JOB",
            PacketType::JobCreated => "JOB_CREATED",
            PacketType::GrabJob => "GRAB_JOB",
            PacketType::NoJob => "NO_JOB",
            PacketType::JobAssign => "JOB_ASSIGN",
            PacketType::WorkStatus => "WORK_STATUS",
            PacketType::WorkComplete => "WORK_COMPLETE",
            PacketType::WorkFail => "WORK_FAIL",
            PacketType::GetStatus => "GET_STATUS",
            PacketType::EchoReq => "ECHO_REQ",
            PacketType::EchoRes => "ECHO_RES",
            PacketType::SubmitJobBg => "SUBMIT_JOB_BG",
            PacketType::Error => "ERROR",
            PacketType::StatusRes => "STATUS_RES",
            PacketType::SubmitJobHigh => "SUBMIT_JOB_HIGH",
            PacketType::SetClientId => "SET_CLIENT_ID",
            PacketType::CanDoTimeout => "CAN_DO_TIMEOUT",
            PacketType::AllYours => "ALL_YOURS",
            PacketType::WorkException => "WORK_EXCEPTION",
            PacketType::OptionReq => "OPTION_REQ",
            PacketType::OptionRes => "OPTION_RES",
            PacketType::WorkData => "WORK_DATA",
            PacketType::WorkWarning => "WORK_WARNING",
            PacketType::GrabJobUniq => "GRAB_JOB_UNIQ",
            PacketType::JobAssignUniq => "JOB_ASSIGN_UNIQ",
            PacketType::SubmitJobHighBg => "SUBMIT_JOB_HIGH_BG",
            PacketType::SubmitJobLow => "SUBMIT_JOB_LOW",
            PacketType::SubmitJobLowBg => "SUBMIT_JOB_LOW_BG",
            PacketType::SubmitJobSched => "SUBMIT_JOB_SCHED",
            PacketType::SubmitJobEpoch => "SUBMIT_JOB_EPOCH",
        }
    }
}

impl TryFrom<u32> for PacketType {
    type Error = GearmanError;

    fn try_from(code: u32) -> Result<Self, GearmanError> {
        PacketType::ALL
            .iter()
            .copied()
            .find(|t| t.code() == code)
            .ok_or(GearmanError::UnknownType(code))
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_lookup_covers_all_types() {
        for t in PacketType::ALL {
            assert_eq!(PacketType::try_from(t.code()).unwrap(), t);
        }
    }

    #[test]
    fn test_unassigned_codes_rejected() {
        for code in [0u32, 5, 37, u32::MAX] {
            assert!(matches!(
                PacketType::try_from(code),
                Err(GearmanError::UnknownType(c)) if c == code
            ));
        }
    }

    #[test]
    fn test_submission_matrix() {
        let cases = [
            (JobPriority::Low, false, PacketType::SubmitJobLow),
            (JobPriority::Low, true, PacketType::SubmitJobLowBg),
            (JobPriority::Normal, false, PacketType::SubmitJob),
            (JobPriority::Normal, true, PacketType::SubmitJobBg),
            (JobPriority::High, false, PacketType::SubmitJobHigh),
            (JobPriority::High, true, PacketType::SubmitJobHighBg),
        ];
        for (priority, background, expected) in cases {
            let t = PacketType::submission(priority, background);
            assert_eq!(t, expected);
            assert!(t.is_job_submission());
            assert_eq!(t.is_background_submission(), background);
            assert_eq!(t.priority(), Some(priority));
        }
    }

    #[test]
    fn test_requires_response() {
        assert!(PacketType::SubmitJob.requires_response());
        assert!(PacketType::GrabJob.requires_response());
        assert!(PacketType::PreSleep.requires_response());
        assert!(PacketType::EchoReq.requires_response());
        assert!(!PacketType::CanDo.requires_response());
        assert!(!PacketType::SetClientId.requires_response());
        assert!(!PacketType::WorkComplete.requires_response());
        assert!(!PacketType::ResetAbilities.requires_response());
    }

    #[test]
    fn test_reply_matching() {
        assert!(PacketType::JobCreated.is_reply_to(PacketType::SubmitJobHighBg));
        assert!(PacketType::NoJob.is_reply_to(PacketType::GrabJob));
        assert!(PacketType::JobAssign.is_reply_to(PacketType::GrabJob));
        assert!(PacketType::JobAssignUniq.is_reply_to(PacketType::GrabJob));
        assert!(PacketType::JobAssignUniq.is_reply_to(PacketType::GrabJobUniq));
        assert!(PacketType::JobAssign.is_reply_to(PacketType::GrabJobUniq));
        assert!(!PacketType::JobAssign.is_reply_to(PacketType::PreSleep));
        assert!(PacketType::Noop.is_reply_to(PacketType::PreSleep));
        assert!(!PacketType::WorkComplete.is_reply_to(PacketType::SubmitJob));
        assert!(!PacketType::Error.is_reply_to(PacketType::EchoReq));
    }

    #[test]
    fn test_display_uses_protocol_name() {
        assert_eq!(PacketType::SubmitJobLowBg.to_string(), "SUBMIT_JOB_LOW_BG");
        assert_eq!(PacketType::Noop.to_string(), "NOOP");
    }
}
