//! Generated protobuf modules
//!
//! build.rs compiles the Meshtastic `.proto` files under `protos/` (or `MESHTASTIC_PROTO_DIR`);
//! prost emits one file per package (`meshtastic.rs`).

pub mod meshtastic_generated {
    //! Generated Meshtastic protobuf types.
    //! Wrapped in a submodule with broad allow() attributes so the parts of the schema we do not
    //! touch stay warning free.
    #[allow(dead_code, unused_imports, unused_variables, unused_mut, unused_macros)]
    #[allow(clippy::all)]
    // Generated docs can contain tag-like text; relax strict rustdoc HTML checks here
    #[allow(rustdoc::invalid_html_tags)]
    mod inner {
        include!(concat!(env!("OUT_DIR"), "/meshtastic.rs"));
    }
    pub use inner::*;
}
