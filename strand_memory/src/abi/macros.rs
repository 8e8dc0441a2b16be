/// Convenient macro for defining entry points that accept a null object.
///
/// For each entry, this macro generates an exported function
/// that does nothing when given null,
/// and otherwise calls the given method on the handle.
macro_rules! nullable_exports
{
    (
        $(
            $(#[doc = $doc:expr])*
            pub fn $name:ident(
                object
                $(, $param_name:ident: $param_type:ty)*
                $(,)?
            ) => $method:ident($($arg:expr),*);
        )*
    ) => {
        $(
            $(#[doc = $doc])*
            ///
            /// Does nothing if the object is null.
            ///
            /// # Safety
            ///
            /// See the method of the same name on [`UnsafeHandle`].
            #[no_mangle]
            pub unsafe extern "C" fn $name(
                object: Option<UnsafeHandle>,
                $($param_name: $param_type),*
            )
            {
                if let Some(object) = object {
                    object.$method($($arg),*);
                }
            }
        )*
    };
}
