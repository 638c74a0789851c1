use std::io;
use std::mem::{size_of, zeroed};
use std::net::SocketAddr;
use std::os::fd::RawFd;

use libc::{
    accept, bind, fcntl, listen, setsockopt, sockaddr, sockaddr_in, socket, socklen_t, AF_INET,
    F_GETFL, F_SETFL, O_NONBLOCK, SOCK_STREAM, SOL_SOCKET, SOMAXCONN, SO_REUSEADDR,
};

use super::fd::Fd;

pub fn create_listening_socket(addr: SocketAddr) -> io::Result<Fd> {
    let fd = unsafe { socket(AF_INET, SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = Fd(fd);

    let yes: i32 = 1;
    unsafe {
        setsockopt(
            fd.raw(),
            SOL_SOCKET,
            SO_REUSEADDR,
            &yes as *const _ as *const _,
            size_of::<i32>() as socklen_t,
        );
    }
    set_nonblocking(fd.raw())?;

    let sa = to_sockaddr_in(addr)?;
    let res = unsafe {
        bind(
            fd.raw(),
            &sa as *const sockaddr_in as *const sockaddr,
            size_of::<sockaddr_in>() as socklen_t,
        )
    };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { listen(fd.raw(), SOMAXCONN) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// One `accept` attempt on a non-blocking listener. `Ok(None)` means the
/// accept queue is drained.
pub fn accept_nonblocking(listen_fd: RawFd) -> io::Result<Option<Fd>> {
    let mut addr: sockaddr_in = unsafe { zeroed() };
    let mut len = size_of::<sockaddr_in>() as socklen_t;
    let fd = unsafe {
        accept(
            listen_fd,
            &mut addr as *mut _ as *mut sockaddr,
            &mut len as *mut socklen_t,
        )
    };
    if fd < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(None);
        }
        return Err(err);
    }
    let fd = Fd(fd);
    set_nonblocking(fd.raw())?;
    Ok(Some(fd))
}

pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn to_sockaddr_in(addr: SocketAddr) -> io::Result<sockaddr_in> {
    match addr {
        SocketAddr::V4(v4) => {
            let mut sa: sockaddr_in = unsafe { zeroed() };
            sa.sin_family = AF_INET as libc::sa_family_t;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets()).to_be();
            Ok(sa)
        }
        SocketAddr::V6(_) => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "IPv6 listen addresses are not supported",
        )),
    }
}
