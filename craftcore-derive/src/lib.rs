use proc_macro::TokenStream;
use quote::quote;
use syn::punctuated::Punctuated;
use syn::token::Comma;
use syn::{parse_macro_input, Data, DeriveInput, Field, Fields, Ident, Variant};

fn refuse(input: &DeriveInput, message: &str) -> TokenStream {
    syn::Error::new(input.ident.span(), message)
        .to_compile_error()
        .into()
}

fn named_fields<'a>(
    input: &'a DeriveInput,
    derive: &str,
) -> Result<&'a Punctuated<Field, Comma>, TokenStream> {
    if let Data::Struct(data) = &input.data {
        if let Fields::Named(fields) = &data.fields {
            return Ok(&fields.named);
        }
    }
    Err(refuse(
        input,
        &format!("Only structs with named fields can derive `{derive}`"),
    ))
}

/// Names of the variants of a packet enum. Each variant wraps exactly one packet.
fn packet_variants<'a>(
    input: &'a DeriveInput,
    derive: &str,
) -> Result<Vec<&'a Ident>, TokenStream> {
    let Data::Enum(data) = &input.data else {
        return Err(refuse(input, &format!("Only enums can derive `{derive}`")));
    };
    data.variants
        .iter()
        .map(|variant: &Variant| match &variant.fields {
            Fields::Unnamed(fields) if fields.unnamed.len() == 1 => Ok(&variant.ident),
            _ => Err(refuse(input, &format!("`{}` must wrap exactly one packet", variant.ident))),
        })
        .collect()
}

/// Sums the wire size of every named field.
#[proc_macro_derive(SizedProt)]
pub fn derive_sized_prot(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let fields = match named_fields(&input, "SizedProt") {
        Ok(fields) => fields,
        Err(e) => return e,
    };
    let sizes = fields.iter().map(|field| {
        let name = &field.ident;
        quote!(crate::protocol_types::traits::SizedProt::prot_size(&self.#name))
    });
    let name = &input.ident;
    quote!(
        impl crate::protocol_types::traits::SizedProt for #name {
            fn prot_size(&self) -> usize {
                0 #(+ #sizes)*
            }
        }
    )
    .into()
}

/// Writes the named fields in declaration order.
#[proc_macro_derive(WriteProt)]
pub fn derive_write_prot(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let fields = match named_fields(&input, "WriteProt") {
        Ok(fields) => fields,
        Err(e) => return e,
    };
    let writes = fields.iter().map(|field| {
        let name = &field.ident;
        quote!(crate::protocol_types::traits::WriteProt::write(&self.#name, stream).await?;)
    });
    let name = &input.ident;
    quote!(
        #[::async_trait::async_trait]
        impl crate::protocol_types::traits::WriteProt for #name {
            async fn write(&self, stream: &mut (impl ::tokio::io::AsyncWrite + Unpin + Send)) -> Result<(), String> {
                #(#writes)*
                Ok(())
            }
        }
    )
    .into()
}

/// Frames every variant of a clientbound packet enum: `encode` writes the wrapped packet's
/// fields and prefixes them with the packet id and the frame length.
#[proc_macro_derive(WriteProtPacket)]
pub fn derive_write_prot_packet(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let variants = match packet_variants(&input, "WriteProtPacket") {
        Ok(variants) => variants,
        Err(e) => return e,
    };
    let name = &input.ident;
    let arms = variants
        .iter()
        .map(|variant| quote!(#name::#variant(p) => crate::packets::frame::encode_packet(p).await,));
    quote!(
        #[::async_trait::async_trait]
        impl crate::protocol_types::traits::WriteProtPacket for #name {
            async fn encode(&self) -> Result<Vec<u8>, String> {
                match self {
                    #(#arms)*
                }
            }
        }
    )
    .into()
}

/// Dispatches every variant of a serverbound packet enum to the wrapped packet's handler.
/// Adding a variant without a `ServerPacket` impl is a compile error.
#[proc_macro_derive(HandlePacket)]
pub fn derive_handle_packet(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let variants = match packet_variants(&input, "HandlePacket") {
        Ok(variants) => variants,
        Err(e) => return e,
    };
    let name = &input.ident;
    let arms = variants.iter().map(|variant| {
        quote!(#name::#variant(p) => crate::protocol_types::traits::ServerPacket::handle(p, session, server).await,)
    });
    quote!(
        #[::async_trait::async_trait]
        impl crate::protocol_types::traits::HandlePacket for #name {
            async fn handle(
                &self,
                session: &mut crate::connection::Session,
                server: &::std::sync::Arc<crate::Server>,
            ) -> Result<(), crate::err::ProtError> {
                match self {
                    #(#arms)*
                }
            }
        }
    )
    .into()
}
