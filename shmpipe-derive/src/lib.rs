use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Error, Result};

/// Derives `shmpipe::FromShm`, a size and alignment checked view of a
/// `#[repr(C)]` struct over the start of a mapped segment.
///
/// The struct must be valid for every bit pattern, zero included, since a
/// freshly created segment is zero-filled and peers may write it at any time.
#[proc_macro_derive(FromShm)]
pub fn derive_from_shm(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let name = input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    if let Err(err) = check_repr_c(&input.attrs, &name.span(), "FromShm") {
        return err.into_compile_error().into();
    }

    let from_shm = match from_shm_impl(&input.data, &name.span()) {
        Ok(body) => body,
        Err(err) => return err.into_compile_error().into(),
    };

    let expanded = quote! {
        unsafe impl #impl_generics shmpipe::FromShm for #name #ty_generics #where_clause {
            fn from_shm(shm: &shmpipe::Shm) -> shmpipe::Result<&Self> {
                #from_shm
            }
        }
    };

    proc_macro::TokenStream::from(expanded)
}

fn from_shm_impl(data: &Data, span: &Span) -> Result<TokenStream> {
    match *data {
        Data::Struct(_) => Ok(quote! {
            let size = ::core::mem::size_of::<Self>();
            if shm.len() < size {
                return Err(shmpipe::Error::Size { expected: size, actual: shm.len() });
            }
            let ptr = shm.as_ptr() as *const Self;
            if !ptr.is_aligned() {
                return Err(shmpipe::Error::Alignment(::core::mem::align_of::<Self>()));
            }
            // SAFETY: the mapping covers `size` bytes and lives as long as `shm`,
            // the pointer is aligned, and implementors accept any bit pattern.
            unsafe { Ok(&*ptr) }
        }),
        Data::Enum(_) | Data::Union(_) => Err(Error::new(
            *span,
            "FromShm: only structs can be viewed over shared memory",
        )),
    }
}

fn check_repr_c(attrs: &[Attribute], span: &Span, trait_name: &str) -> Result<()> {
    let mut has_repr = false;
    let err_msg = &format!("{}: struct must be repr(C)", trait_name);
    for attr in attrs {
        if attr.path().is_ident("repr") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("C") {
                    has_repr = true;
                    Ok(())
                } else if meta.path.is_ident("align") {
                    // repr(C, align(N)) is fine, skip the argument.
                    let content;
                    syn::parenthesized!(content in meta.input);
                    content.parse::<syn::LitInt>()?;
                    Ok(())
                } else {
                    Err(meta.error(err_msg))
                }
            })?;
        }
    }
    if has_repr {
        Ok(())
    } else {
        Err(Error::new(*span, err_msg))
    }
}
