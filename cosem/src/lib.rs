//! cosem - a client-side DLMS/COSEM communication stack
//!
//! Talks to electricity meters over the IP wrapper (TCP/UDP) or an HDLC
//! link over TCP, establishes application associations up to HLS-5
//! (mutual GMAC authentication with APDU ciphering), and drives
//! Get/Set/Action including block transfer in both directions.
//!
//! # Crates
//!
//! - `cosem-core`: error sum, OBIS codes, COSEM data values
//! - `cosem-asn1`: A-XDR and BER codecs, ACSE PDUs
//! - `cosem-transport`: TCP and UDP byte streams
//! - `cosem-session`: wrapper framing and the HDLC link layer
//! - `cosem-security`: security suite 5 APDU ciphering
//! - `cosem-application`: xDLMS service PDUs
//! - `cosem-client`: connection facade, association, request engine
//!
//! # Example
//!
//! ```no_run
//! use cosem::client::{DlmsConnection, Hls5Settings};
//! use cosem::application::AttributeDescriptor;
//! use cosem::ObisCode;
//!
//! # async fn run() -> cosem::CosemResult<()> {
//! let conn = DlmsConnection::tcp_connect("10.0.0.7".parse().unwrap(), 4059).await?;
//! let settings = Hls5Settings::new(
//!     vec![0u8; 16],
//!     vec![0u8; 16],
//!     *b"MEL\x00\x00\x00\x00\x01",
//!     b")HB+0F04".to_vec(),
//! );
//! let (aconn, _initiate) = conn.app_connect_hls5(1, 1, settings).await?;
//!
//! let energy = aconn
//!     .get(
//!         AttributeDescriptor::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2),
//!         None,
//!     )
//!     .await?;
//! println!("active energy: {:?}", energy.into_data()?);
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

pub use cosem_core::{CosemError, CosemResult, DlmsData, ObisCode};

pub mod client {
    pub use cosem_client::*;
}

pub mod application {
    pub use cosem_application::*;
}

pub mod security {
    pub use cosem_security::*;
}

pub mod session {
    pub use cosem_session::*;
}

pub mod transport {
    pub use cosem_transport::*;
}

pub mod asn1 {
    pub use cosem_asn1::*;
}
