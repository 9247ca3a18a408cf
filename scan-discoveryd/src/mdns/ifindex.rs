use std::io;

/// Look up the kernel index of a network interface by name
#[cfg(unix)]
pub fn interface_index(name: &str) -> io::Result<u32> {
    let c_name = std::ffi::CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid interface name"))?;

    // SAFETY: c_name is a valid NUL-terminated string; if_nametoindex only
    // reads it and returns 0 on error.
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };

    if index == 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(index)
}

#[cfg(not(unix))]
pub fn interface_index(_name: &str) -> io::Result<u32> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "interface index lookup is not supported on this platform",
    ))
}
