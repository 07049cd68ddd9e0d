//! AE title newtypes and `dicom-ul` association option builders
//! (`spec.md` §4.6 "DICOM SCP State Machine", §4.7 "DICOM SCU Connection").

use aliri_braid::braid;
use dicom_encoding::TransferSyntaxIndex;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use dicom_ul::association::server::AcceptAny;
use dicom_ul::association::{ClientAssociationOptions, ServerAssociationOptions};

use crate::transfer::ABSTRACT_SYNTAXES;

/// Our AE title, used both as the SCP's own title and as the SCU's calling title.
#[braid]
pub struct OurAETitle;

/// The AE title of a peer: a modality calling in, or a remote store we call out to.
#[braid(serde)]
pub struct ClientAETitle;

/// Negotiation parameters shared by every accepted association
/// (`spec.md` §4.6 "negotiates presentation contexts").
pub struct ServerNegotiation {
    pub aet: OurAETitle,
    /// Whether receiving PDUs must not surpass the negotiated maximum PDU length.
    pub strict: bool,
    pub uncompressed_only: bool,
    /// Whether to accept unknown abstract syntaxes (`spec.md` §4.6 edge case).
    pub promiscuous: bool,
    pub max_pdu_length: u32,
}

impl<'a> From<ServerNegotiation> for ServerAssociationOptions<'a, AcceptAny> {
    fn from(config: ServerNegotiation) -> Self {
        let mut options = ServerAssociationOptions::new()
            .accept_any()
            .ae_title(config.aet.to_string())
            .strict(config.strict)
            .max_pdu_length(config.max_pdu_length);
        if config.uncompressed_only {
            options = options
                .with_transfer_syntax("1.2.840.10008.1.2")
                .with_transfer_syntax("1.2.840.10008.1.2.1");
        } else {
            for ts in TransferSyntaxRegistry.iter() {
                if !ts.is_unsupported() {
                    options = options.with_transfer_syntax(ts.uid());
                }
            }
        }
        for uid in ABSTRACT_SYNTAXES {
            options = options.with_abstract_syntax(*uid);
        }
        options.promiscuous(config.promiscuous)
    }
}

/// Build the `ClientAssociationOptions` used to open an outbound association
/// for a single abstract syntax (`spec.md` §4.7 "negotiates presentation
/// contexts against the remote").
pub fn client_options_for<'a>(
    abstract_syntax: &'a str,
    calling_aet: &'a OurAETitle,
    called_aet: &'a ClientAETitle,
    max_pdu_length: u32,
) -> ClientAssociationOptions<'a> {
    ClientAssociationOptions::new()
        .with_abstract_syntax(abstract_syntax)
        .calling_ae_title(calling_aet.as_str())
        .called_ae_title(called_aet.as_str())
        .max_pdu_length(max_pdu_length)
}
