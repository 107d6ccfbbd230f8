// Create the implementations of the ToNetworkOrder and FromNetworkOrder
// traits for a structure: each trait method is the concatenation of the
// same method called on every field, in declaration order.
use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DataStruct, DeriveInput};

// verify if the derive macro is applied to a structure
fn get_struct(ast: &DeriveInput) -> &DataStruct {
    if let Data::Struct(struct_token) = &ast.data {
        struct_token
    } else {
        panic!("<{}> is not a struct!", ast.ident.to_string());
    }
}

// create the impl methods for traits ToNetworkOrder & FromNetworkOrder
pub fn dns_struct(ast: &DeriveInput) -> TokenStream {
    // get struct data or panic
    let struct_token = get_struct(ast);

    // save structure name because we're gonna use it soon
    let structure_name = &ast.ident;

    // call to_network_bytes() for each field
    let to_method_calls = struct_token.fields.iter().map(|f| {
        // get name of the field as TokenStream
        let field_name = f.ident.as_ref().unwrap();

        quote! {
            length += ToNetworkOrder::to_network_bytes(&self.#field_name, buffer)?;
        }
    });

    // call from_network_bytes() for each field
    let from_method_calls = struct_token.fields.iter().map(|f| {
        // get name of the field as TokenStream
        let field_name = f.ident.as_ref().unwrap();

        quote! {
            FromNetworkOrder::from_network_bytes(&mut self.#field_name, buffer)?;
        }
    });

    // the generated impls; the deriving module is expected to have
    // ToNetworkOrder, FromNetworkOrder and DNSResult in scope
    let new_code = quote! {
        impl ToNetworkOrder for #structure_name {
            fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> std::io::Result<usize> {
                let mut length = 0usize;
                #( #to_method_calls)*
                Ok(length)
            }
        }

        impl FromNetworkOrder for #structure_name {
            fn from_network_bytes(&mut self, buffer: &mut std::io::Cursor<&[u8]>) -> DNSResult<()> {
                #( #from_method_calls)*
                Ok(())
            }
        }
    };

    // Hand the output tokens back to the compiler
    TokenStream::from(new_code)
}
