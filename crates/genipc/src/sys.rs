//! Thin wrappers over the libc socket calls used by the stream and factory types.

use std::ffi::CStr;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

const NI_MAXHOST: usize = 1025;
const NI_MAXSERV: usize = 32;
const HOSTNAME_MAX: usize = 256;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

/// Map a `-1` return into the current `errno`.
fn cvt(rc: libc::c_int) -> io::Result<libc::c_int> {
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

fn cvt_size(rc: libc::ssize_t) -> io::Result<usize> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// Retry `f` while it fails with `EINTR`.
fn retry<T>(mut f: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match f() {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Allocate a close-on-exec IPv4 stream socket.
pub(crate) fn tcp_socket() -> io::Result<OwnedFd> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let ty = libc::SOCK_STREAM | libc::SOCK_CLOEXEC;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let ty = libc::SOCK_STREAM;

    // SAFETY: plain syscall with constant arguments.
    let fd = cvt(unsafe { libc::socket(libc::AF_INET, ty, 0) })?;
    // SAFETY: `fd` was just returned by `socket` and is owned by nobody else.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        // SAFETY: `fd` is an open descriptor owned by this function.
        cvt(unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) })?;
    }

    #[cfg(target_vendor = "apple")]
    set_flag(std::os::fd::AsFd::as_fd(&fd), libc::SO_NOSIGPIPE, true)?;

    Ok(fd)
}

/// Toggle a boolean `SOL_SOCKET` option.
pub(crate) fn set_flag(fd: BorrowedFd<'_>, option: libc::c_int, on: bool) -> io::Result<()> {
    let value: libc::c_int = on.into();
    // SAFETY: `value` outlives the call and its size is passed alongside it.
    cvt(unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            option,
            (&value as *const libc::c_int).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    })?;
    Ok(())
}

fn to_sockaddr(addr: SocketAddrV4) -> libc::sockaddr_in {
    // SAFETY: `sockaddr_in` is plain old data; all-zero is a valid value.
    let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_port = addr.port().to_be();
    sin.sin_addr = libc::in_addr {
        s_addr: u32::from_ne_bytes(addr.ip().octets()),
    };
    #[cfg(any(
        target_vendor = "apple",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd"
    ))]
    {
        sin.sin_len = std::mem::size_of::<libc::sockaddr_in>() as u8;
    }
    sin
}

fn from_sockaddr(sin: &libc::sockaddr_in) -> SocketAddrV4 {
    SocketAddrV4::new(
        Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes()),
        u16::from_be(sin.sin_port),
    )
}

const SOCKADDR_IN_LEN: libc::socklen_t =
    std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

pub(crate) fn connect(fd: BorrowedFd<'_>, addr: SocketAddrV4) -> io::Result<()> {
    let sin = to_sockaddr(addr);
    // SAFETY: `sin` is a fully initialized `sockaddr_in` of the advertised length.
    let rc = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            (&sin as *const libc::sockaddr_in).cast::<libc::sockaddr>(),
            SOCKADDR_IN_LEN,
        )
    };
    match cvt(rc) {
        Ok(_) => Ok(()),
        // An interrupted connect keeps going in the background; wait for it by
        // polling for writability and then read the final status.
        Err(err) if err.kind() == io::ErrorKind::Interrupted => finish_connect(fd),
        Err(err) => Err(err),
    }
}

fn finish_connect(fd: BorrowedFd<'_>) -> io::Result<()> {
    let mut pollfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events: libc::POLLOUT,
        revents: 0,
    };
    // SAFETY: `pollfd` is a single valid entry.
    retry(|| cvt(unsafe { libc::poll(&mut pollfd, 1, -1) }))?;

    let mut status: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: `status` and `len` are valid writable pointers for the provided sizes.
    cvt(unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            (&mut status as *mut libc::c_int).cast::<libc::c_void>(),
            &mut len,
        )
    })?;
    if status == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(status))
    }
}

pub(crate) fn bind(fd: BorrowedFd<'_>, addr: SocketAddrV4) -> io::Result<()> {
    let sin = to_sockaddr(addr);
    // SAFETY: `sin` is a fully initialized `sockaddr_in` of the advertised length.
    cvt(unsafe {
        libc::bind(
            fd.as_raw_fd(),
            (&sin as *const libc::sockaddr_in).cast::<libc::sockaddr>(),
            SOCKADDR_IN_LEN,
        )
    })?;
    Ok(())
}

pub(crate) fn listen(fd: BorrowedFd<'_>, backlog: i32) -> io::Result<()> {
    // SAFETY: plain syscall on an open descriptor.
    cvt(unsafe { libc::listen(fd.as_raw_fd(), backlog) })?;
    Ok(())
}

/// Block until a peer connects; returns the new descriptor and peer address.
pub(crate) fn accept(fd: BorrowedFd<'_>) -> io::Result<(OwnedFd, SocketAddrV4)> {
    retry(|| {
        // SAFETY: all-zero is a valid `sockaddr_in`.
        let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        let mut len = SOCKADDR_IN_LEN;
        let out = (&mut sin as *mut libc::sockaddr_in).cast::<libc::sockaddr>();
        // SAFETY: `out` and `len` describe a writable buffer of `len` bytes.
        #[cfg(any(target_os = "linux", target_os = "android"))]
        let raw =
            cvt(unsafe { libc::accept4(fd.as_raw_fd(), out, &mut len, libc::SOCK_CLOEXEC) })?;
        // SAFETY: `out` and `len` describe a writable buffer of `len` bytes.
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        let raw = cvt(unsafe { libc::accept(fd.as_raw_fd(), out, &mut len) })?;
        // SAFETY: `raw` is a freshly accepted descriptor owned by nobody else.
        let stream = unsafe { OwnedFd::from_raw_fd(raw) };
        #[cfg(target_vendor = "apple")]
        set_flag(std::os::fd::AsFd::as_fd(&stream), libc::SO_NOSIGPIPE, true)?;
        Ok((stream, from_sockaddr(&sin)))
    })
}

pub(crate) fn local_addr(fd: BorrowedFd<'_>) -> io::Result<SocketAddrV4> {
    // SAFETY: all-zero is a valid `sockaddr_in`.
    let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    let mut len = SOCKADDR_IN_LEN;
    // SAFETY: `sin` and `len` describe a writable buffer of `len` bytes.
    cvt(unsafe {
        libc::getsockname(
            fd.as_raw_fd(),
            (&mut sin as *mut libc::sockaddr_in).cast::<libc::sockaddr>(),
            &mut len,
        )
    })?;
    Ok(from_sockaddr(&sin))
}

pub(crate) fn peer_addr(fd: BorrowedFd<'_>) -> io::Result<SocketAddrV4> {
    // SAFETY: all-zero is a valid `sockaddr_in`.
    let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    let mut len = SOCKADDR_IN_LEN;
    // SAFETY: `sin` and `len` describe a writable buffer of `len` bytes.
    cvt(unsafe {
        libc::getpeername(
            fd.as_raw_fd(),
            (&mut sin as *mut libc::sockaddr_in).cast::<libc::sockaddr>(),
            &mut len,
        )
    })?;
    Ok(from_sockaddr(&sin))
}

/// Resolve an address into `(host, service)` strings via `getnameinfo`.
pub(crate) fn name_info(addr: SocketAddrV4, numeric: bool) -> io::Result<(String, String)> {
    let sin = to_sockaddr(addr);
    let mut host = [0 as libc::c_char; NI_MAXHOST];
    let mut serv = [0 as libc::c_char; NI_MAXSERV];
    let flags = if numeric {
        libc::NI_NUMERICHOST | libc::NI_NUMERICSERV
    } else {
        0
    };

    // SAFETY: both output buffers are writable for the lengths passed, and `sin`
    // is a fully initialized `sockaddr_in`.
    let rc = unsafe {
        libc::getnameinfo(
            (&sin as *const libc::sockaddr_in).cast::<libc::sockaddr>(),
            SOCKADDR_IN_LEN,
            host.as_mut_ptr(),
            NI_MAXHOST as libc::socklen_t,
            serv.as_mut_ptr(),
            NI_MAXSERV as libc::socklen_t,
            flags,
        )
    };
    if rc != 0 {
        // SAFETY: `gai_strerror` returns a static NUL-terminated string.
        let msg = unsafe { CStr::from_ptr(libc::gai_strerror(rc)) };
        return Err(io::Error::other(format!(
            "getnameinfo: {}",
            msg.to_string_lossy()
        )));
    }

    // SAFETY: `getnameinfo` NUL-terminates both buffers on success.
    let host = unsafe { CStr::from_ptr(host.as_ptr()) };
    // SAFETY: as above.
    let serv = unsafe { CStr::from_ptr(serv.as_ptr()) };
    Ok((
        host.to_string_lossy().into_owned(),
        serv.to_string_lossy().into_owned(),
    ))
}

pub(crate) fn hostname() -> io::Result<String> {
    let mut buf = [0u8; HOSTNAME_MAX + 1];
    // SAFETY: `buf` is writable for `HOSTNAME_MAX` bytes; the final byte stays NUL.
    cvt(unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), HOSTNAME_MAX) })?;
    let name = CStr::from_bytes_until_nul(&buf).map_err(io::Error::other)?;
    Ok(name.to_string_lossy().into_owned())
}

pub(crate) fn send(fd: BorrowedFd<'_>, buf: &[u8]) -> io::Result<usize> {
    retry(|| {
        // SAFETY: `buf` is readable for `buf.len()` bytes.
        cvt_size(unsafe {
            libc::send(
                fd.as_raw_fd(),
                buf.as_ptr().cast::<libc::c_void>(),
                buf.len(),
                SEND_FLAGS,
            )
        })
    })
}

pub(crate) fn recv(fd: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<usize> {
    retry(|| {
        // SAFETY: `buf` is writable for `buf.len()` bytes.
        cvt_size(unsafe {
            libc::recv(
                fd.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
                0,
            )
        })
    })
}

pub(crate) fn shutdown(fd: BorrowedFd<'_>, how: std::net::Shutdown) -> io::Result<()> {
    let how = match how {
        std::net::Shutdown::Read => libc::SHUT_RD,
        std::net::Shutdown::Write => libc::SHUT_WR,
        std::net::Shutdown::Both => libc::SHUT_RDWR,
    };
    // SAFETY: plain syscall on an open descriptor.
    cvt(unsafe { libc::shutdown(fd.as_raw_fd(), how) })?;
    Ok(())
}
