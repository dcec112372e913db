mod admission;
mod send_email;
