use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    Data, DeriveInput, Fields, GenericArgument, LitStr, PathArguments, Type, parse_macro_input,
};

/// Container options: `#[storable(table = "...")]` plus the serde renaming we mirror.
struct Container {
    table: String,
    camel_case: bool,
}

impl Container {
    fn parse(input: &DeriveInput) -> syn::Result<Self> {
        let mut table = None;
        let mut camel_case = false;

        for attr in &input.attrs {
            if attr.path().is_ident("storable") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("table") {
                        table = Some(meta.value()?.parse::<LitStr>()?.value());
                        Ok(())
                    } else {
                        Err(meta.error("unsupported storable option"))
                    }
                })?;
            } else if attr.path().is_ident("serde") {
                // Other serde options are not ours to validate.
                let _ = attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("rename_all") {
                        camel_case = meta.value()?.parse::<LitStr>()?.value() == "camelCase";
                    } else if meta.input.peek(syn::Token![=]) {
                        meta.value()?.parse::<syn::Lit>()?;
                    }
                    Ok(())
                });
            }
        }

        let table = table.ok_or_else(|| {
            syn::Error::new_spanned(&input.ident, "missing #[storable(table = \"...\")] attribute")
        })?;
        Ok(Self { table, camel_case })
    }
}

/// One stored column, derived from a named field.
struct Column {
    name: String,
    sql_type: &'static str,
    json_key: String,
    primary_key: bool,
    references: Option<(String, String)>,
}

impl Column {
    /// Returns `None` for `#[column(skip)]` fields.
    fn parse(field: &syn::Field, container: &Container) -> syn::Result<Option<Self>> {
        let Some(ident) = field.ident.as_ref() else {
            return Ok(None);
        };
        let field_name = ident.to_string();

        let mut skip = false;
        let mut rename = None;
        let mut references = None;
        let mut primary_key = false;

        for attr in &field.attrs {
            if attr.path().is_ident("primary_key") {
                primary_key = true;
                continue;
            }
            if !attr.path().is_ident("column") {
                continue;
            }
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    skip = true;
                } else if meta.path.is_ident("name") {
                    rename = Some(meta.value()?.parse::<LitStr>()?.value());
                } else if meta.path.is_ident("references") {
                    let target = meta.value()?.parse::<LitStr>()?.value();
                    let (table, column) = target
                        .split_once('.')
                        .ok_or_else(|| meta.error("references must be \"table.column\""))?;
                    references = Some((table.to_string(), column.to_string()));
                } else {
                    return Err(meta.error("unsupported column option"));
                }
                Ok(())
            })?;
        }

        if skip {
            return Ok(None);
        }

        let json_key = if container.camel_case {
            camel_case(&field_name)
        } else {
            field_name.clone()
        };
        Ok(Some(Self {
            name: rename.unwrap_or(field_name),
            sql_type: sql_type(&field.ty),
            json_key,
            primary_key,
            references,
        }))
    }
}

fn camel_case(snake: &str) -> String {
    let mut parts = snake.split('_');
    let mut out = parts.next().unwrap_or_default().to_string();
    for part in parts {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

/// The type's last path segment, looking through `Option<_>`.
fn base_type_name(ty: &Type) -> Option<String> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident == "Option" {
        if let PathArguments::AngleBracketed(args) = &segment.arguments {
            if let Some(GenericArgument::Type(inner)) = args.args.first() {
                return base_type_name(inner);
            }
        }
    }
    Some(segment.ident.to_string())
}

/// Backend-neutral column type; anything unrecognised is stored as text.
fn sql_type(ty: &Type) -> &'static str {
    match base_type_name(ty).as_deref() {
        Some("StorageDatetime" | "DateTime") => "datetime",
        Some("i64" | "u64") => "bigint",
        Some("i32" | "u32" | "i16" | "u16" | "isize" | "usize") => "integer",
        Some("bool") => "boolean",
        Some("Value") => "json",
        _ => "text",
    }
}

/// Derive macro for the Storable trait.
///
/// ## Attributes
///
/// - `#[storable(table = "...")]` (container, required) - table name
/// - `#[primary_key]` (field) - part of the primary key; repeat for composite keys
/// - `#[column(skip)]` - not stored
/// - `#[column(name = "...")]` - column name override
/// - `#[column(references = "table.column")]` - foreign key
///
/// JSON keys follow serde: the field name, or camelCase when the container has
/// `#[serde(rename_all = "camelCase")]`.
///
/// ## Example
///
/// ```text
/// #[derive(Serialize, Deserialize, Storable)]
/// #[storable(table = "books")]
/// struct BookRow {
///     #[primary_key]
///     pub id: i64,
///     pub title: String,
///     pub deleted_at: Option<StorageDatetime>,
/// }
/// ```
#[proc_macro_derive(Storable, attributes(storable, primary_key, column))]
pub fn derive_storable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let ident = &input.ident;
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(ident, "Storable only supports structs"));
    };
    let Fields::Named(named) = &data.fields else {
        return Err(syn::Error::new_spanned(
            ident,
            "Storable only supports structs with named fields",
        ));
    };

    let container = Container::parse(input)?;
    let mut columns = Vec::new();
    for field in &named.named {
        if let Some(column) = Column::parse(field, &container)? {
            columns.push(column);
        }
    }

    if !columns.iter().any(|c| c.primary_key) {
        return Err(syn::Error::new_spanned(
            ident,
            "Storable requires at least one #[primary_key] field",
        ));
    }

    let table = &container.table;
    let names = columns.iter().map(|c| &c.name);
    let types = columns.iter().map(|c| c.sql_type);
    let keys = columns.iter().map(|c| &c.json_key);
    let primary = columns.iter().filter(|c| c.primary_key).map(|c| &c.name);
    let foreign = columns.iter().filter_map(|c| {
        let (ref_table, ref_column) = c.references.as_ref()?;
        let column = &c.name;
        Some(quote! {
            library_storage::ForeignKey {
                column: #column,
                table: #ref_table,
                references: #ref_column,
            }
        })
    });

    Ok(quote! {
        impl library_storage::Storable for #ident {
            fn table_name() -> &'static str {
                #table
            }

            fn columns() -> &'static [&'static str] {
                &[#(#names),*]
            }

            fn column_types() -> &'static [&'static str] {
                &[#(#types),*]
            }

            fn json_keys() -> &'static [&'static str] {
                &[#(#keys),*]
            }

            fn primary_key() -> &'static [&'static str] {
                &[#(#primary),*]
            }

            fn foreign_keys() -> &'static [library_storage::ForeignKey] {
                &[#(#foreign),*]
            }
        }
    })
}
